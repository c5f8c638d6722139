use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use astrobio_discovery::cache::{StudyCache, SystemClock};
use astrobio_discovery::config::ConfigLoader;
use astrobio_discovery::curated::{CuratedStore, FileStore, NewRecord, RecordPatch};
use astrobio_discovery::domain::{
    FilterSet, PublicationStatus, SortBy, SortOptions, SortOrder, YearRange,
};
use astrobio_discovery::error::AstroError;
use astrobio_discovery::facets::facet_options;
use astrobio_discovery::osdr::{OsdrClient, OsdrHttpClient};
use astrobio_discovery::output::{JsonOutput, RefreshSummary};
use astrobio_discovery::recommend::recommend;
use astrobio_discovery::search::{SearchRequest, SearchService};

#[derive(Parser)]
#[command(name = "astrobio")]
#[command(about = "Space-biology research discovery over the NASA OSDR repository")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Search studies across OSDR and curated records")]
    Search(SearchArgs),
    #[command(about = "Recommend studies for a set of interest tags")]
    Recommend(RecommendArgs),
    #[command(about = "Show repository-wide statistics")]
    Stats,
    #[command(about = "Show facet options derived from curated records")]
    Facets,
    #[command(about = "Force a refresh of the cached study database")]
    Refresh,
    #[command(about = "Manage curated research records")]
    Curated(CuratedArgs),
}

#[derive(Args)]
struct SearchArgs {
    query: Option<String>,

    #[arg(long)]
    year_range: Option<YearRange>,

    #[arg(long)]
    start_date: Option<String>,

    #[arg(long)]
    end_date: Option<String>,

    #[arg(long = "organism")]
    organisms: Vec<String>,

    #[arg(long = "experiment-type")]
    experiment_types: Vec<String>,

    #[arg(long = "mission")]
    missions: Vec<String>,

    #[arg(long = "tissue-type")]
    tissue_types: Vec<String>,

    #[arg(long = "research-area")]
    research_areas: Vec<String>,

    #[arg(long = "keyword")]
    keywords: Vec<String>,

    #[arg(long, value_enum)]
    publication_status: Option<PublicationStatus>,

    #[arg(long)]
    osd: Option<String>,

    #[command(flatten)]
    sort: SortArgs,

    #[arg(long)]
    user: Option<String>,
}

#[derive(Args)]
struct RecommendArgs {
    #[arg(long = "interest", required = true)]
    interests: Vec<String>,

    #[command(flatten)]
    sort: SortArgs,
}

#[derive(Args)]
struct SortArgs {
    #[arg(long, value_enum)]
    sort_by: Option<SortBy>,

    #[arg(long, value_enum)]
    sort_order: Option<SortOrder>,

    #[arg(long, value_enum)]
    secondary_sort: Option<SortBy>,
}

impl SortArgs {
    fn resolve(&self) -> SortOptions {
        let defaults = SortOptions::default();
        SortOptions {
            sort_by: self.sort_by.unwrap_or(defaults.sort_by),
            sort_order: self.sort_order.unwrap_or(defaults.sort_order),
            secondary_sort: self.secondary_sort,
        }
    }
}

#[derive(Args)]
struct CuratedArgs {
    #[command(subcommand)]
    command: CuratedCommand,
}

#[derive(Subcommand)]
enum CuratedCommand {
    #[command(about = "Create a curated record")]
    Add(AddArgs),
    #[command(about = "List curated records")]
    List {
        #[arg(long)]
        published_only: bool,
    },
    #[command(about = "Show one curated record")]
    Show { id: String },
    #[command(about = "Update fields of a curated record")]
    Update(UpdateArgs),
    #[command(about = "Delete a curated record")]
    Remove { id: String },
}

#[derive(Args)]
struct AddArgs {
    #[arg(long)]
    title: String,

    #[arg(long)]
    description: String,

    #[arg(long)]
    year: Option<String>,

    #[arg(long)]
    authors: Option<String>,

    #[arg(long)]
    institution: Option<String>,

    #[arg(long)]
    osd: Option<String>,

    #[arg(long = "tag")]
    tags: Vec<String>,

    #[arg(long = "link")]
    links: Vec<String>,

    #[arg(long = "custom", value_name = "KEY=VALUE")]
    custom: Vec<String>,

    #[arg(long)]
    published: bool,

    #[arg(long)]
    created_by: Option<String>,
}

#[derive(Args)]
struct UpdateArgs {
    id: String,

    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    description: Option<String>,

    #[arg(long)]
    year: Option<String>,

    #[arg(long)]
    authors: Option<String>,

    #[arg(long)]
    institution: Option<String>,

    #[arg(long)]
    osd: Option<String>,

    #[arg(long = "tag")]
    tags: Vec<String>,

    #[arg(long = "link")]
    links: Vec<String>,

    #[arg(long = "custom", value_name = "KEY=VALUE")]
    custom: Vec<String>,

    #[arg(long)]
    published: Option<bool>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(astro) = report.downcast_ref::<AstroError>() {
            return ExitCode::from(map_exit_code(astro));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &AstroError) -> u8 {
    match error {
        AstroError::RecordNotFound(_) | AstroError::ConfigRead(_) => 2,
        AstroError::OsdrHttp(_)
        | AstroError::OsdrStatus { .. }
        | AstroError::ServiceUnavailable(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let resolved = ConfigLoader::resolve(cli.config.as_deref()).into_diagnostic()?;

    let store: Arc<dyn CuratedStore> = match &resolved.store_root {
        Some(root) => Arc::new(FileStore::new_with_root(root.clone())),
        None => Arc::new(FileStore::new().into_diagnostic()?),
    };

    match cli.command {
        Commands::Search(args) => {
            let cache = build_cache(&resolved)?;
            let service = SearchService::new(cache, store);
            let request = SearchRequest {
                query: args.query.clone(),
                filters: filters_from(&args),
                sort: args.sort.resolve(),
                interests: None,
                user_id: args.user.clone(),
            };
            let response = service.search(request).into_diagnostic()?;
            JsonOutput::print_search(&response).into_diagnostic()?;
            // The history write runs on its own thread; join it so it is
            // not lost when the process exits right after printing.
            service.flush_search_log();
            Ok(())
        }
        Commands::Recommend(args) => {
            let cache = build_cache(&resolved)?;
            let results = recommend(
                cache.client(),
                store.as_ref(),
                &args.interests,
                Some(args.sort.resolve()),
            );
            JsonOutput::print_studies(&results).into_diagnostic()?;
            Ok(())
        }
        Commands::Stats => {
            let cache = build_cache(&resolved)?;
            let snapshot = cache.get_statistics().into_diagnostic()?;
            JsonOutput::print_statistics(&snapshot).into_diagnostic()?;
            Ok(())
        }
        Commands::Facets => {
            let records = store.all_records(false).into_diagnostic()?;
            let facets = facet_options(&records);
            JsonOutput::print_facets(&facets).into_diagnostic()?;
            Ok(())
        }
        Commands::Refresh => {
            let cache = build_cache(&resolved)?;
            let refreshed_studies = cache.force_refresh().into_diagnostic()?;
            JsonOutput::print_refresh(&RefreshSummary { refreshed_studies }).into_diagnostic()?;
            Ok(())
        }
        Commands::Curated(args) => run_curated(args.command, store.as_ref()),
    }
}

fn build_cache(
    resolved: &astrobio_discovery::config::ResolvedConfig,
) -> miette::Result<StudyCache<impl OsdrClient + 'static>> {
    let client = OsdrHttpClient::with_base_url(&resolved.base_url).into_diagnostic()?;
    Ok(StudyCache::new(
        client,
        Box::new(SystemClock),
        resolved.cache.clone(),
    ))
}

fn filters_from(args: &SearchArgs) -> FilterSet {
    FilterSet {
        year_range: args.year_range,
        start_date: args.start_date.clone(),
        end_date: args.end_date.clone(),
        organisms: args.organisms.clone(),
        experiment_types: args.experiment_types.clone(),
        missions: args.missions.clone(),
        tissue_types: args.tissue_types.clone(),
        research_areas: args.research_areas.clone(),
        keywords: args.keywords.clone(),
        publication_status: args.publication_status.unwrap_or_default(),
        osd_study_number: args.osd.clone(),
    }
}

fn run_curated(command: CuratedCommand, store: &dyn CuratedStore) -> miette::Result<()> {
    match command {
        CuratedCommand::Add(args) => {
            let input = NewRecord {
                title: args.title,
                description: args.description,
                year: args.year,
                authors: args.authors,
                institution: args.institution,
                osd_study_number: args.osd,
                tags: args.tags,
                nasa_osdr_links: args.links,
                custom_fields: parse_custom(&args.custom)?,
                published: args.published,
                created_by: args.created_by,
            };
            let record = store.create(input).into_diagnostic()?;
            JsonOutput::print_record(&record).into_diagnostic()?;
            Ok(())
        }
        CuratedCommand::List { published_only } => {
            let records = store.all_records(published_only).into_diagnostic()?;
            JsonOutput::print_records(&records).into_diagnostic()?;
            Ok(())
        }
        CuratedCommand::Show { id } => {
            let record = store
                .record(&id)
                .into_diagnostic()?
                .ok_or(AstroError::RecordNotFound(id))
                .into_diagnostic()?;
            JsonOutput::print_record(&record).into_diagnostic()?;
            Ok(())
        }
        CuratedCommand::Update(args) => {
            let patch = RecordPatch {
                title: args.title,
                description: args.description,
                year: args.year,
                authors: args.authors,
                institution: args.institution,
                osd_study_number: args.osd,
                tags: (!args.tags.is_empty()).then_some(args.tags),
                nasa_osdr_links: (!args.links.is_empty()).then_some(args.links),
                custom_fields: parse_custom(&args.custom)?,
                published: args.published,
            };
            let record = store.update(&args.id, patch).into_diagnostic()?;
            JsonOutput::print_record(&record).into_diagnostic()?;
            Ok(())
        }
        CuratedCommand::Remove { id } => {
            store.delete(&id).into_diagnostic()?;
            Ok(())
        }
    }
}

fn parse_custom(pairs: &[String]) -> miette::Result<Option<Map<String, Value>>> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let mut fields = Map::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(miette::Report::msg(format!(
                "invalid --custom value '{pair}' (expected KEY=VALUE)"
            )));
        };
        fields.insert(key.trim().to_string(), Value::String(value.to_string()));
    }
    Ok(Some(fields))
}

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use canopy_analytics::config::{ConfigLoader, ResolvedConfig};
use canopy_analytics::domain::LocationContext;
use canopy_analytics::engine::{Dashboard, Engine};
use canopy_analytics::error::{CanopyError, ErrorClass};
use canopy_analytics::otf::{QueryExecutor, QueryHttpClient};
use canopy_analytics::output::{DashboardReport, JsonOutput, PlanReport, WidgetSummary};
use canopy_analytics::params::{PageContext, ParamBag, ParamValue};
use canopy_analytics::precomputed::{PrecomputedClient, PrecomputedHttpClient, PrecomputedRequest};
use canopy_analytics::query::{Row, ValidQuery};
use canopy_analytics::registry::Registry;

#[derive(Parser)]
#[command(name = "canopy")]
#[command(about = "Widget data orchestration for forest-monitoring dashboards")]
#[command(version, author)]
struct Cli {
    /// Path to canopy.json; defaults to ./canopy.json, then the user config dir.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List registered widgets")]
    Widgets(WidgetsArgs),
    #[command(about = "Fetch and print one widget's data")]
    Data(WidgetArgs),
    #[command(about = "Show the route and queries without executing them")]
    Plan(WidgetArgs),
    #[command(about = "Print export descriptors for a widget")]
    Download(WidgetArgs),
    #[command(about = "Refresh every widget eligible for a location")]
    Dashboard(DashboardArgs),
}

#[derive(Args)]
struct WidgetsArgs {
    /// Only list widgets eligible for this location.
    #[arg(long)]
    location: Option<String>,
}

#[derive(Args, Clone)]
struct WidgetArgs {
    widget: String,

    /// `global`, `country:BRA`, `region:BRA.12.3`, `wdpa:<id>@<geostore>`,
    /// `aoi:<id>@<geostore>[!saved]` or `use:<id>@<geostore>`.
    #[arg(long)]
    location: String,

    /// Widget setting as key=value; repeatable.
    #[arg(long = "set", value_parser = parse_setting)]
    settings: Vec<(String, ParamValue)>,

    #[arg(long)]
    map_page: bool,
}

#[derive(Args)]
struct DashboardArgs {
    #[arg(long)]
    location: String,

    #[arg(long)]
    map_page: bool,
}

fn parse_setting(raw: &str) -> Result<(String, ParamValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty setting key in {raw}"));
    }
    Ok((key.to_string(), ParamValue::parse_loose(value)))
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<CanopyError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CanopyError) -> u8 {
    match error.class() {
        ErrorClass::Configuration => 2,
        ErrorClass::Execution => 3,
        ErrorClass::Normalization => 4,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let registry = Registry::builtin()?;

    match cli.command {
        Commands::Widgets(args) => run_widgets(args, &registry),
        Commands::Data(args) => run_data(args, online_engine(registry, &config)?),
        Commands::Plan(args) => run_plan(args, offline_engine(registry, &config)),
        Commands::Download(args) => run_download(args, offline_engine(registry, &config)),
        Commands::Dashboard(args) => run_dashboard(args, online_engine(registry, &config)?),
    }
}

fn online_engine(
    registry: Registry,
    config: &ResolvedConfig,
) -> miette::Result<Engine<QueryHttpClient, PrecomputedHttpClient>> {
    let executor = QueryHttpClient::new(config)?;
    let precomputed = PrecomputedHttpClient::new(config)?;
    Ok(Engine::new(registry, executor, precomputed)
        .with_metadata(config.metadata.clone())
        .with_api_url(&config.api_url))
}

fn offline_engine(registry: Registry, config: &ResolvedConfig) -> Engine<Offline, Offline> {
    Engine::new(registry, Offline, Offline)
        .with_metadata(config.metadata.clone())
        .with_api_url(&config.api_url)
}

fn user_settings(args: &WidgetArgs) -> ParamBag {
    args.settings.iter().cloned().collect()
}

fn run_widgets(args: WidgetsArgs, registry: &Registry) -> miette::Result<()> {
    let widgets: Vec<WidgetSummary> = match args.location {
        Some(location) => {
            let location: LocationContext = location.parse()?;
            registry
                .eligible(&location)
                .map(WidgetSummary::from)
                .collect()
        }
        None => registry.iter().map(WidgetSummary::from).collect(),
    };
    JsonOutput::print_widgets(&widgets).into_diagnostic()
}

fn run_data<Q: QueryExecutor, P: PrecomputedClient>(
    args: WidgetArgs,
    engine: Engine<Q, P>,
) -> miette::Result<()> {
    let location: LocationContext = args.location.parse()?;
    let page = PageContext {
        map_page: args.map_page,
    };
    let params = engine.resolve(&args.widget, &location, &user_settings(&args), page)?;
    let result = engine.get_data(&params)?;
    JsonOutput::print_result(&result).into_diagnostic()
}

fn run_plan<Q: QueryExecutor, P: PrecomputedClient>(
    args: WidgetArgs,
    engine: Engine<Q, P>,
) -> miette::Result<()> {
    let location: LocationContext = args.location.parse()?;
    let page = PageContext {
        map_page: args.map_page,
    };
    let params = engine.resolve(&args.widget, &location, &user_settings(&args), page)?;
    let plan = engine.plan(&params)?;
    let report = PlanReport::new(&params, &plan)?;
    JsonOutput::print_plan(&report).into_diagnostic()
}

fn run_download<Q: QueryExecutor, P: PrecomputedClient>(
    args: WidgetArgs,
    engine: Engine<Q, P>,
) -> miette::Result<()> {
    let location: LocationContext = args.location.parse()?;
    let page = PageContext {
        map_page: args.map_page,
    };
    let params = engine.resolve(&args.widget, &location, &user_settings(&args), page)?;
    let downloads = engine.get_data_url(&params)?;
    JsonOutput::print_downloads(&downloads).into_diagnostic()
}

fn run_dashboard<Q: QueryExecutor, P: PrecomputedClient>(
    args: DashboardArgs,
    engine: Engine<Q, P>,
) -> miette::Result<()> {
    let location: LocationContext = args.location.parse()?;
    let page = PageContext {
        map_page: args.map_page,
    };
    let mut dashboard = Dashboard::new(&engine, location, page);
    let refreshed = dashboard.refresh();
    let report = DashboardReport::new(&dashboard, &refreshed.outcomes);
    JsonOutput::print_dashboard(&report).into_diagnostic()?;
    match refreshed.first_error() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

struct Offline;

impl QueryExecutor for Offline {
    fn execute(&self, query: &ValidQuery) -> Result<Vec<Row>, CanopyError> {
        Err(CanopyError::QueryHttp(format!(
            "query execution disabled for {}",
            query.table()
        )))
    }
}

impl PrecomputedClient for Offline {
    fn fetch(&self, request: &PrecomputedRequest) -> Result<Vec<Row>, CanopyError> {
        Err(CanopyError::PrecomputedHttp(format!(
            "precomputed reads disabled for {}",
            request.dataset
        )))
    }
}

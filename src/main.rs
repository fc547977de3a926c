use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use work_metrics_lib::aggregate::format_count;
use work_metrics_lib::config::AppConfig;
use work_metrics_lib::grid::DateRange;
use work_metrics_lib::models::{
    CounterInput, CreateWorkPayload, ListWorksFilters, MetricEntry, SaveAccountPayload, SaveCategoryPayload,
    UpdateWorkPayload,
};
use work_metrics_lib::service::MetricsService;

#[derive(Parser)]
#[command(name = "work-metrics")]
#[command(about = "Daily metrics for published works")]
struct Cli {
    /// Data directory holding the database, logs and config.yaml
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `work_metrics_lib=trace`
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and print the active settings
    Init,

    /// Manage account categories
    Category {
        #[command(subcommand)]
        action: CategoryAction,
    },

    /// Manage accounts
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },

    /// Manage works
    Work {
        #[command(subcommand)]
        action: WorkAction,
    },

    /// Inspect the dense daily grid of a work
    Grid {
        #[command(subcommand)]
        action: GridAction,
    },

    /// Write daily counters
    Metrics {
        #[command(subcommand)]
        action: MetricsAction,
    },

    /// Peak counters per work, formatted for display
    Summary {
        #[arg(long)]
        account_id: Option<i64>,
    },
}

#[derive(Subcommand)]
enum CategoryAction {
    Add {
        name: String,
        #[arg(long)]
        color: Option<String>,
    },
    /// Rename or recolor a category; omitted options keep their value
    Edit {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    List,
    Delete {
        id: i64,
    },
}

#[derive(Subcommand)]
enum AccountAction {
    Add {
        name: String,
        #[arg(long)]
        category_id: Option<i64>,
    },
    /// Rename an account or move it to another category
    Edit {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, conflicts_with = "no_category")]
        category_id: Option<i64>,
        /// Detach the account from its category
        #[arg(long)]
        no_category: bool,
    },
    List,
    Delete {
        id: i64,
    },
}

#[derive(Subcommand)]
enum WorkAction {
    Add {
        account_id: i64,
        title: String,
        #[arg(long)]
        cover_image: Option<String>,
    },
    /// Change the title or publication time of a work
    Edit {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        /// RFC 3339 timestamp, e.g. 2024-03-01T08:00:00Z
        #[arg(long)]
        published_at: Option<DateTime<Utc>>,
    },
    List {
        #[arg(long)]
        account_id: Option<i64>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    Delete {
        id: i64,
    },
}

#[derive(Subcommand)]
enum GridAction {
    /// Without --start/--end the grid runs from the work's creation day to today
    Show {
        work_id: i64,
        #[arg(long, requires = "end")]
        start: Option<String>,
        #[arg(long, requires = "start")]
        end: Option<String>,
    },
}

#[derive(Subcommand)]
enum MetricsAction {
    /// Upsert the counters of one day
    Set {
        work_id: i64,
        /// Day in YYYY-MM-DD form
        date: String,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        likes: i64,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        comments: i64,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        messages: i64,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        views: i64,
    },
    /// Upsert a JSON array of {date, likes, comments, messages, views} in one transaction
    Import {
        work_id: i64,
        file: PathBuf,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryLine {
    work_id: i64,
    title: String,
    days_recorded: u64,
    likes: String,
    comments: String,
    messages: String,
    views: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(error) = run(cli).await {
        eprintln!("Error: {:#}", error);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::load(cli.data_dir, cli.log_level)?;
    if let Err(error) = work_metrics_lib::init_tracing(&config) {
        eprintln!("Logging disabled: {}", error);
    }
    let service = MetricsService::new(&config)
        .with_context(|| format!("failed to open {}", config.database_path().display()))?;

    match cli.command {
        Commands::Init => print_json(&service.get_settings()?),
        Commands::Category { action } => match action {
            CategoryAction::Add { name, color } => {
                print_json(&service.save_category(SaveCategoryPayload { id: None, name, color })?)
            }
            CategoryAction::Edit { id, name, color } => {
                let current = service
                    .list_categories()?
                    .into_iter()
                    .find(|category| category.id == id)
                    .ok_or_else(|| anyhow!("category {} does not exist", id))?;
                print_json(&service.save_category(SaveCategoryPayload {
                    id: Some(id),
                    name: name.unwrap_or(current.name),
                    color: color.or(Some(current.color)),
                })?)
            }
            CategoryAction::List => print_json(&service.list_categories()?),
            CategoryAction::Delete { id } => print_json(&service.delete_category(id)?),
        },
        Commands::Account { action } => match action {
            AccountAction::Add { name, category_id } => print_json(&service.save_account(SaveAccountPayload {
                id: None,
                name,
                category_id,
            })?),
            AccountAction::Edit {
                id,
                name,
                category_id,
                no_category,
            } => {
                let current = service
                    .get_account(id)?
                    .ok_or_else(|| anyhow!("account {} does not exist", id))?;
                let category_id = if no_category {
                    None
                } else {
                    category_id.or(current.category_id)
                };
                print_json(&service.save_account(SaveAccountPayload {
                    id: Some(id),
                    name: name.unwrap_or(current.name),
                    category_id,
                })?)
            }
            AccountAction::List => print_json(&service.list_accounts()?),
            AccountAction::Delete { id } => print_json(&service.delete_account(id).await?),
        },
        Commands::Work { action } => match action {
            WorkAction::Add {
                account_id,
                title,
                cover_image,
            } => print_json(&service.create_work(CreateWorkPayload {
                account_id,
                title,
                cover_image,
                published_at: None,
            })?),
            WorkAction::Edit {
                id,
                title,
                published_at,
            } => print_json(&service.update_work(UpdateWorkPayload {
                id,
                title,
                published_at,
            })?),
            WorkAction::List {
                account_id,
                search,
                limit,
            } => print_json(&service.list_works(&ListWorksFilters {
                account_id,
                search,
                limit,
                ..ListWorksFilters::default()
            })?),
            WorkAction::Delete { id } => print_json(&service.delete_work(id).await?),
        },
        Commands::Grid {
            action: GridAction::Show { work_id, start, end },
        } => {
            let range = match (start, end) {
                (Some(start), Some(end)) => Some(DateRange::parse(&start, &end)?),
                _ => None,
            };
            let view = service.open_edit_session(work_id, range).await?;
            service.close_edit_session(&view.session_id).await;
            print_json(&view)
        }
        Commands::Metrics { action } => match action {
            MetricsAction::Set {
                work_id,
                date,
                likes,
                comments,
                messages,
                views,
            } => print_json(&service.upsert_metrics(
                work_id,
                &date,
                CounterInput::new(likes, comments, messages, views),
            )?),
            MetricsAction::Import { work_id, file } => {
                let raw = std::fs::read_to_string(&file)
                    .with_context(|| format!("failed to read {}", file.display()))?;
                let entries: Vec<MetricEntry> = serde_json::from_str(&raw)
                    .with_context(|| format!("{} is not a JSON array of metric entries", file.display()))?;
                let written = service.import_metrics(work_id, &entries)?;
                print_json(&serde_json::json!({ "workId": work_id, "rows": written }))
            }
        },
        Commands::Summary { account_id } => {
            let works = service.list_works(&ListWorksFilters {
                account_id,
                ..ListWorksFilters::default()
            })?;
            let lines: Vec<SummaryLine> = works
                .into_iter()
                .map(|summary| SummaryLine {
                    work_id: summary.work.id,
                    title: summary.work.title,
                    days_recorded: summary.metrics_count,
                    likes: format_count(summary.maxima.max_likes),
                    comments: format_count(summary.maxima.max_comments),
                    messages: format_count(summary.maxima.max_messages),
                    views: format_count(summary.maxima.max_views),
                })
                .collect();
            print_json(&lines)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

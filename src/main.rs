use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

use spotbook::compactor;
use spotbook::config::Config;
use spotbook::engine::{EngineError, WalEngine, WalStore};
use spotbook::model::{Day, Image, ListQuery};

#[derive(Debug, Parser)]
#[command(name = "spotbook", version, about = "Reservation admission for bookable spots")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register a bookable resource.
    CreateResource {
        #[arg(long)]
        id: Option<Ulid>,
    },
    /// Remove a resource with its reservations and ratings.
    DeleteResource { id: Ulid },
    /// Reserve `[start, end)` on a resource.
    Reserve {
        resource: Ulid,
        holder: Ulid,
        start: Day,
        end: Day,
    },
    /// Cancel a reservation as its holder, or as the resource owner with --owner.
    Cancel {
        reservation: Ulid,
        caller: Ulid,
        #[arg(long)]
        owner: bool,
    },
    /// Rate a resource from 1 to 5 stars.
    Rate { resource: Ulid, reviewer: Ulid, stars: u8 },
    /// List reservations as seen by `viewer`.
    List {
        resource: Ulid,
        viewer: Ulid,
        #[arg(long)]
        owner: bool,
    },
    /// Show every reservation a date range would collide with.
    Conflicts { resource: Ulid, start: Day, end: Day },
    /// Average rating and preview image. Images are `URL` or `URL,preview`.
    Summary {
        resource: Ulid,
        #[arg(long = "image", value_parser = parse_image)]
        images: Vec<Image>,
    },
    /// Rewrite the log with only live state.
    Compact,
}

impl Command {
    fn is_write(&self) -> bool {
        matches!(
            self,
            Command::CreateResource { .. }
                | Command::DeleteResource { .. }
                | Command::Reserve { .. }
                | Command::Cancel { .. }
                | Command::Rate { .. }
        )
    }
}

fn parse_image(s: &str) -> Result<Image, String> {
    let (url, preview) = match s.strip_suffix(",preview") {
        Some(url) => (url, true),
        None => (s, false),
    };
    if url.is_empty() {
        return Err("image URL is empty".into());
    }
    Ok(Image {
        url: url.to_string(),
        preview,
    })
}

async fn run(engine: &WalEngine, command: Command) -> Result<Value, EngineError> {
    let out = match command {
        Command::CreateResource { id } => {
            let id = id.unwrap_or_else(Ulid::new);
            engine.create_resource(id).await?;
            json!({ "id": id })
        }
        Command::DeleteResource { id } => {
            engine.delete_resource(id).await?;
            json!({ "deleted": id })
        }
        Command::Reserve {
            resource,
            holder,
            start,
            end,
        } => json!(engine.try_reserve(resource, holder, start, end).await?),
        Command::Cancel {
            reservation,
            caller,
            owner,
        } => json!(engine.cancel_reservation(reservation, caller, owner).await?),
        Command::Rate {
            resource,
            reviewer,
            stars,
        } => json!(engine.add_rating(resource, reviewer, stars).await?),
        Command::List {
            resource,
            viewer,
            owner,
        } => {
            let query = ListQuery {
                resource_id: resource,
                viewer_id: viewer,
                is_owner: owner,
            };
            json!({ "reservations": engine.list_reservations(&query).await? })
        }
        Command::Conflicts {
            resource,
            start,
            end,
        } => {
            let conflicts: Vec<Value> = engine
                .conflicts(resource, start, end)
                .await?
                .into_iter()
                .map(|(id, kind)| {
                    json!({ "reservation_id": id, "kind": kind, "message": kind.message() })
                })
                .collect();
            json!({ "conflicts": conflicts })
        }
        Command::Summary { resource, images } => {
            json!(engine.resource_summary(resource, &images).await?)
        }
        Command::Compact => {
            engine.store().compact().await?;
            json!({ "compacted": true })
        }
    };
    Ok(out)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    spotbook::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(WalStore::open(&config.wal_path())?);
    let engine = WalEngine::new(store.clone());

    let writes = cli.command.is_write();
    match run(&engine, cli.command).await {
        Ok(out) => println!("{}", serde_json::to_string_pretty(&out)?),
        Err(e) => {
            let body = json!({
                "error": e.label(),
                "message": e.to_string(),
                "retryable": e.is_retryable(),
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
            return Err(e.into());
        }
    }

    if writes {
        compactor::compact_if_due(&store, config.compact_threshold).await;
    }
    Ok(())
}

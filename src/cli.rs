//! Command line interface

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use couchlink::config::Config;
use couchlink::document::{DynamicDoc, Identifiable};
use couchlink::store::{Database, Server};
use couchlink::sync::{Replication, SyncLink};

pub const EXAMPLES: &str = r#"
  # Count conflicted documents, creating the conflict index if needed
  $ couchlink conflicts people --count --force-index

  # Resolve a conflict with a merged document
  $ couchlink resolve people p1 '{"name": "Peter"}'

  # Keep two databases on different hosts in sync
  $ couchlink sync people http://admin:pw@10.0.0.2:5984/people --continuous
"#;

#[derive(Debug, Parser)]
#[command(author, version, about = "Conflict and replication tooling for CouchDB", long_about = None)]
#[command(after_help = EXAMPLES)]
pub struct RootCommand {
    #[command(flatten)]
    pub args: RootArgs,

    #[command(subcommand)]
    pub action: SubCommands,
}

#[derive(Debug, Parser)]
pub struct RootArgs {
    /// Store URL
    #[arg(long, value_name = "URL", env = "COUCH_URL")]
    pub url: Option<String>,

    /// User for basic auth
    #[arg(long, value_name = "USER", env = "COUCH_USER")]
    pub user: Option<String>,

    /// Password for basic auth
    #[arg(long, value_name = "PASSWORD", env = "COUCH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum SubCommands {
    /// List or count conflicted documents
    Conflicts {
        /// Database name or URL
        db: String,
        /// Print the number of conflicts only
        #[arg(long)]
        count: bool,
        /// Create the conflict index if it is missing
        #[arg(long)]
        force_index: bool,
    },
    /// Print the competing revisions of a document
    Show { db: String, key: String },
    /// Resolve a conflict with the given JSON document
    Resolve { db: String, key: String, json: String },
    /// Replicate one database to another
    Replicate {
        source: String,
        target: String,
        #[arg(long)]
        continuous: bool,
        /// Cancel a running replication instead of starting one
        #[arg(long)]
        cancel: bool,
    },
    /// Replicate in both directions
    Sync {
        a: String,
        b: String,
        #[arg(long)]
        continuous: bool,
        /// Cancel a running sync instead of starting one
        #[arg(long)]
        cancel: bool,
    },
    /// List active replications
    Tasks,
}

impl RootCommand {
    pub async fn run(self, mut config: Config) -> Result<()> {
        if let Some(url) = self.args.url {
            config.store.url = url;
        }
        if let Some(user) = self.args.user {
            config.store.username = Some(user);
        }
        if let Some(password) = self.args.password {
            config.store.password = Some(password);
        }

        let server = Server::from_config(&config)
            .with_context(|| format!("Invalid store URL {}", config.store.url))?;

        match self.action {
            SubCommands::Conflicts {
                db,
                count,
                force_index,
            } => {
                let db = open(&server, &db)?;
                if count {
                    println!("{}", db.conflicts_count(force_index).await?);
                } else {
                    for key in db.conflicts(force_index).await? {
                        println!("{key}");
                    }
                }
            }
            SubCommands::Show { db, key } => {
                let db = open(&server, &db)?;
                match db.conflict_for(&key).await? {
                    Some(conflict) => print_json(conflict.revisions_raw())?,
                    None => println!("{key} has no conflict"),
                }
            }
            SubCommands::Resolve { db, key, json } => {
                let db = open(&server, &db)?;
                let mut doc: DynamicDoc =
                    serde_json::from_str(&json).context("Final document is not a JSON object")?;

                match db.conflict_for(&key).await? {
                    Some(mut conflict) => {
                        conflict.resolve(&mut doc).await?;
                        println!("{} {}", doc.id(), doc.rev());
                    }
                    None => println!("{key} has no conflict"),
                }
            }
            SubCommands::Replicate {
                source,
                target,
                continuous,
                cancel,
            } => {
                let mut replication =
                    Replication::new(open(&server, &source)?, open(&server, &target)?, continuous);
                if cancel {
                    replication.cancel().await?;
                } else {
                    replication.start().await?;
                    println!("{}", replication.session_id());
                }
            }
            SubCommands::Sync {
                a,
                b,
                continuous,
                cancel,
            } => {
                let (a, b) = (open(&server, &a)?, open(&server, &b)?);
                if cancel {
                    SyncLink::new(&a, &b, continuous).cancel().await?;
                } else {
                    let link = SyncLink::start(&a, &b, continuous).await?;
                    println!("{}", link.a_to_b().session_id());
                    println!("{}", link.b_to_a().session_id());
                }
            }
            SubCommands::Tasks => print_json(&server.replications().await?)?,
        }

        Ok(())
    }
}

/// A database argument is either a name on the configured server or a full URL
fn open(server: &Server, db: &str) -> Result<Database> {
    if db.contains("://") {
        Ok(server.database_from_url(db)?)
    } else {
        Ok(server.database(db))
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

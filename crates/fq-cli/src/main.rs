//! # fq: FireQuery command line
//!
//! - `fq health`: Check the hub's datasource settings.
//! - `fq query <text>` / `fq query --collection users --limit 10`: Run a query.
//! - `fq dashboards list`: List saved dashboards.
//! - `fq edit`: Edit a query interactively; it re-runs after each pause.
//! - `fq hub`: Launch the hub.

use std::io::Write;
use std::process::Command;
use std::time::Duration;

use clap::{Parser, Subcommand};
use fq_core::{QueryModel, StructuredQuery};
use fq_editor::{DebounceScheduler, EditorSession};
use serde::Deserialize;
use serde_json::{json, Value};
use tabled::builder::Builder;
use tabled::settings::Style;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// FireQuery: edit and run Firestore queries.
#[derive(Parser)]
#[command(name = "fq", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the datasource settings and connection.
    Health,

    /// Run one query. Free-form text, or a structured query via flags.
    Query {
        /// Free-form query text, e.g. "select * from users limit 5".
        text: Option<String>,

        /// Collection to query (structured mode).
        #[arg(long, conflicts_with = "text")]
        collection: Option<String>,

        /// Fields to return, comma-separated (structured mode).
        #[arg(long, value_delimiter = ',', requires = "collection")]
        select: Vec<String>,

        /// Maximum number of documents, 0 for no limit (structured mode).
        #[arg(long, default_value_t = 0, requires = "collection")]
        limit: u64,

        /// Count matching documents instead of returning them.
        #[arg(long, requires = "collection")]
        count: bool,

        /// Print the raw JSON response.
        #[arg(long)]
        json: bool,
    },

    /// Manage dashboards.
    Dashboards {
        #[command(subcommand)]
        action: DashboardCmd,
    },

    /// Edit a query line by line; it runs after each quiet period.
    Edit {
        /// Quiet period before an edited query runs, in milliseconds.
        #[arg(long, default_value_t = 500)]
        quiet_ms: u64,

        /// Start from a structured query over this collection.
        #[arg(long)]
        collection: Option<String>,
    },

    /// Launch the FireQuery hub.
    Hub {
        /// Server bind address.
        #[arg(long, default_value = "127.0.0.1:3000")]
        bind: String,

        /// Seed documents for the in-memory store.
        #[arg(long)]
        data: Option<String>,

        /// Path to the hub config file.
        #[arg(long, default_value = "fq-hub.toml")]
        config: String,
    },
}

#[derive(Subcommand)]
enum DashboardCmd {
    List,
    Show { id: String },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Hub { bind, data, config } => {
            eprintln!("FireQuery: launching hub...");
            eprintln!("   Bind:   {}", bind);
            eprintln!("   Config: {}", config);

            let mut args = vec!["run", "-p", "fq-hub", "--", "--bind", &bind, "--config", &config];
            if let Some(data) = &data {
                args.push("--data");
                args.push(data);
            }

            let status = Command::new("cargo").args(&args).status();
            match status {
                Ok(s) if s.success() => {}
                Ok(s) => {
                    eprintln!("Hub exited with: {}", s);
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("Failed to launch hub: {}", e);
                    std::process::exit(1);
                }
            }
        }
        // Async Commands
        cmd => {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("Failed to build tokio runtime: {}", e);
                    std::process::exit(1);
                }
            };
            rt.block_on(async_main(cmd));
        }
    }
}

async fn async_main(cmd: Commands) {
    let client = Client::new(
        std::env::var("FQ_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".to_string()),
    );

    match cmd {
        Commands::Health => match client.get("/api/health").await {
            Ok(json) => {
                let status = json["status"].as_str().unwrap_or("unknown");
                let message = json["message"].as_str().unwrap_or_default();
                println!("{}: {}", status, message);
                if status != "ok" {
                    std::process::exit(1);
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Query {
            text,
            collection,
            select,
            limit,
            count,
            json,
        } => {
            let model = match (text, collection) {
                (_, Some(collection)) => QueryModel::Structured(StructuredQuery {
                    collection_path: collection,
                    select,
                    limit,
                    is_count: count,
                    ..StructuredQuery::default()
                }),
                (Some(text), None) => QueryModel::free_form(text),
                (None, None) => {
                    eprintln!("Error: give query text or --collection");
                    std::process::exit(2);
                }
            };

            let result = if json {
                client
                    .post("/api/query", &query_request(&model))
                    .await
                    .map(|v| serde_json::to_string_pretty(&v).unwrap_or_default())
            } else {
                client.run(&model).await
            };
            match result {
                Ok(out) => println!("{}", out),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Dashboards { action } => match dashboards(&client, &action).await {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Edit {
            quiet_ms,
            collection,
        } => {
            let initial = collection.map_or_else(QueryModel::default, QueryModel::structured);
            edit_loop(client, initial, Duration::from_millis(quiet_ms)).await;
        }
        Commands::Hub { .. } => {}
    }
}

async fn dashboards(client: &Client, action: &DashboardCmd) -> Result<String, String> {
    match action {
        DashboardCmd::List => client
            .get("/api/dashboards")
            .await
            .map(|json| dashboards_table(&json)),
        DashboardCmd::Show { id } => client
            .get(&format!("/api/dashboards/{}", id))
            .await
            .map(|json| serde_json::to_string_pretty(&json).unwrap_or_default()),
    }
}

// =============================================================================
// Interactive Editing
// =============================================================================

#[derive(Debug, PartialEq)]
enum EditCommand {
    Set { field: String, value: Value },
    Collection(String),
    Mode(QueryModel),
    Run,
    Show,
    Help,
    Quit,
}

const EDIT_HELP: &str = "\
commands:
  set <field> <json>     e.g. `set limit 10`, `set where.0 {\"path\":\"age\",\"operator\":\">\",\"value\":\"30\"}`
  collection <path>      switch collection (resets limit)
  mode structured|free   switch editing mode
  run                    run now
  show                   print the current query
  quit";

fn parse_command(line: &str) -> Result<Option<EditCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    let cmd = match word {
        "set" => {
            let (field, raw) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            if field.is_empty() {
                return Err("usage: set <field> <json>".into());
            }
            let raw = raw.trim();
            // bare words are taken as strings
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.into()));
            EditCommand::Set {
                field: field.to_string(),
                value,
            }
        }
        "collection" if !rest.is_empty() => EditCommand::Collection(rest.to_string()),
        "collection" => return Err("usage: collection <path>".into()),
        "mode" => match rest {
            "structured" => EditCommand::Mode(QueryModel::structured("")),
            "free" | "free-form" => EditCommand::Mode(QueryModel::default()),
            _ => return Err("usage: mode structured|free".into()),
        },
        "run" => EditCommand::Run,
        "show" => EditCommand::Show,
        "help" | "?" => EditCommand::Help,
        "quit" | "exit" => EditCommand::Quit,
        other => return Err(format!("unknown command '{}', try `help`", other)),
    };
    Ok(Some(cmd))
}

async fn edit_loop(client: Client, initial: QueryModel, quiet_period: Duration) {
    let (tx, mut rx) = mpsc::unbounded_channel::<QueryModel>();

    let runner = tokio::spawn(async move {
        while let Some(model) = rx.recv().await {
            if !model.is_executable() {
                println!("(nothing to run)");
                continue;
            }
            println!("-- {}", model.to_display_string());
            match client.run(&model).await {
                Ok(out) => println!("{}", out),
                Err(e) => eprintln!("Error: {}", e),
            }
        }
    });

    let scheduler = DebounceScheduler::new(quiet_period, move |model: QueryModel| {
        let _ = tx.send(model);
    });
    let mut session = EditorSession::new(initial, scheduler);
    eprintln!("{}", EDIT_HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let _ = std::io::stderr().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        };

        let cmd = match parse_command(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        let edited = match cmd {
            EditCommand::Set { field, value } => session.apply_edit(&field, &value).map(|_| ()),
            EditCommand::Collection(path) => session.change_collection(&path).map(|_| ()),
            EditCommand::Mode(model) => {
                session.replace(model);
                Ok(())
            }
            EditCommand::Run => {
                session.run();
                Ok(())
            }
            EditCommand::Show => {
                println!("{}", session.model());
                Ok(())
            }
            EditCommand::Help => {
                eprintln!("{}", EDIT_HELP);
                Ok(())
            }
            EditCommand::Quit => break,
        };
        if let Err(e) = edited {
            eprintln!("Rejected: {}", e);
        }
    }

    session.teardown();
    drop(session);
    let _ = runner.await;
}

// =============================================================================
// Hub Client
// =============================================================================

struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get(&self, path: &str) -> Result<Value, String> {
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        decode(resp).await
    }

    async fn post(&self, path: &str, json: &Value) -> Result<Value, String> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(json)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        decode(resp).await
    }

    /// Run one model and render its frames as tables.
    async fn run(&self, model: &QueryModel) -> Result<String, String> {
        let resp = self.post("/api/query", &query_request(model)).await?;
        let result: DataResponse = serde_json::from_value(resp["results"]["A"].clone())
            .map_err(|e| format!("unexpected response: {}", e))?;
        if let Some(error) = result.error {
            return Err(format!("{} (status {})", error, result.status.unwrap_or(400)));
        }
        Ok(frames_table(&result.frames))
    }
}

async fn decode(resp: reqwest::Response) -> Result<Value, String> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(format!("{}: {}", status, body));
    }
    resp.json::<Value>().await.map_err(|e| e.to_string())
}

fn query_request(model: &QueryModel) -> Value {
    let mut query = serde_json::to_value(model).unwrap_or_else(|_| json!({}));
    if let Some(obj) = query.as_object_mut() {
        obj.insert("refId".into(), json!("A"));
    }
    json!({ "queries": [query] })
}

// =============================================================================
// Output
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct DataResponse {
    #[serde(default)]
    frames: Vec<FrameView>,
    error: Option<String>,
    status: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct FrameView {
    fields: Vec<FieldView>,
}

#[derive(Debug, Deserialize)]
struct FieldView {
    name: String,
    values: Vec<Value>,
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn frames_table(frames: &[FrameView]) -> String {
    if frames.is_empty() {
        return "(no results)".into();
    }
    frames
        .iter()
        .map(|frame| {
            let rows = frame.fields.first().map_or(0, |f| f.values.len());
            let mut builder = Builder::default();
            builder.push_record(frame.fields.iter().map(|f| f.name.clone()));
            for row in 0..rows {
                builder.push_record(
                    frame
                        .fields
                        .iter()
                        .map(|f| f.values.get(row).map(cell).unwrap_or_default()),
                );
            }
            let mut table = builder.build();
            table.with(Style::rounded());
            format!("{}\n{} row(s)", table, rows)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn dashboards_table(json: &Value) -> String {
    let mut builder = Builder::default();
    builder.push_record(["id", "name", "panels", "updated"].map(String::from));
    for dash in json.as_array().into_iter().flatten() {
        builder.push_record([
            cell(&dash["id"]),
            cell(&dash["name"]),
            dash["panels"].as_array().map_or(0, Vec::len).to_string(),
            cell(&dash["updated_at"]),
        ]);
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

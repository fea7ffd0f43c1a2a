//! Command-line front end: compiles JSON query files against a schema.
#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use tracing::info;

use relq::query::builder::{QueryBuilder, WhereArg};
use relq::query::local::{LocalIndexTranslator, MemoryStore};
use relq::query::memory::InMemoryTranslator;
use relq::query::metadata::{InMemoryMetadata, MetadataProvider};
use relq::query::protocol::ProtocolTranslator;
use relq::query::value::{record_from_json, Record, Value};
use relq::query::QueryDescriptor;
use relq::telemetry::init_tracing;
use relq::EngineConfig;

#[derive(Parser, Debug)]
#[command(
    name = "relq",
    version,
    about = "Compile and run backend-agnostic queries",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "RELQ_CONFIG",
        help = "Engine configuration (TOML)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct QueryArgs {
    #[arg(long, value_name = "FILE", help = "Schema file (.toml or .json)")]
    schema: PathBuf,

    #[arg(long, value_name = "FILE", help = "Query file (JSON)")]
    query: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the remote request URL for a query.
    Url {
        #[command(flatten)]
        query: QueryArgs,

        #[arg(long, help = "Service root URL")]
        base: String,
    },
    /// Run a query over a JSON array of records.
    Run {
        #[command(flatten)]
        query: QueryArgs,

        #[arg(long, value_name = "FILE", help = "Records (JSON array)")]
        records: PathBuf,

        #[arg(long, help = "Serve the query through the local-index planner")]
        local: bool,
    },
    /// Print the local index layout a query needs.
    IndexSchema {
        #[command(flatten)]
        query: QueryArgs,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// On-disk query description.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct QueryFile {
    from: String,
    id: Option<serde_json::Value>,
    #[serde(rename = "where")]
    filter: Option<Vec<serde_json::Value>>,
    order_by: Option<String>,
    top: Option<usize>,
    skip: Option<usize>,
    count: bool,
    select: Option<String>,
    projection: Option<String>,
    data_type: Option<String>,
    custom: BTreeMap<String, String>,
}

impl QueryFile {
    fn load(path: &Path) -> Result<Self, Box<dyn Error>> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn build(
        self,
        metadata: Arc<dyn MetadataProvider>,
        config: &EngineConfig,
    ) -> Result<QueryDescriptor, Box<dyn Error>> {
        let mut builder =
            QueryBuilder::with_config(metadata, config.builder.clone()).from(self.from);
        if let Some(id) = self.id {
            builder = builder.by_id(Value::from(id));
        }
        if let Some(raw) = self.filter {
            builder = builder.where_args(where_args(raw)?);
        }
        if let Some(spec) = self.order_by {
            builder = builder.order_by(&spec);
        }
        if let Some(top) = self.top {
            builder = builder.top(top);
        }
        if let Some(skip) = self.skip {
            builder = builder.skip(skip);
        }
        if self.count {
            builder = builder.count();
        }
        if let Some(select) = self.select {
            builder = builder.select(&select);
        }
        if let Some(name) = self.projection {
            builder = builder.select_by_projection(name);
        }
        if let Some(data_type) = self.data_type {
            builder = builder.of_data_type(data_type);
        }
        builder = builder.with_custom_params(self.custom);
        Ok(builder.build()?)
    }
}

/// A lone object is a serialized predicate; otherwise the arguments are read
/// positionally as `path, op, value`.
fn where_args(raw: Vec<serde_json::Value>) -> Result<Vec<WhereArg>, Box<dyn Error>> {
    if let [single] = raw.as_slice() {
        if single.is_object() {
            return Ok(vec![WhereArg::Predicate(serde_json::from_value(
                single.clone(),
            )?)]);
        }
    }
    let mut args = Vec::with_capacity(raw.len());
    for (idx, value) in raw.into_iter().enumerate() {
        args.push(match (idx, value) {
            (0, serde_json::Value::String(path)) => WhereArg::Path(path),
            (1, serde_json::Value::String(op)) => WhereArg::Op(op.parse()?),
            (_, other) => WhereArg::Value(Value::from(other)),
        });
    }
    Ok(args)
}

fn load_schema(path: &Path) -> Result<InMemoryMetadata, Box<dyn Error>> {
    let raw = fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let metadata = if is_json {
        InMemoryMetadata::from_json_str(&raw)?
    } else {
        InMemoryMetadata::from_toml_str(&raw)?
    };
    Ok(metadata)
}

fn load_records(path: &Path) -> Result<Vec<Record>, Box<dyn Error>> {
    let raw = fs::read_to_string(path)?;
    match serde_json::from_str::<serde_json::Value>(&raw)? {
        serde_json::Value::Array(items) => Ok(items.into_iter().map(record_from_json).collect()),
        _ => Err(format!("{}: expected a JSON array of records", path.display()).into()),
    }
}

fn main() {
    init_tracing("relq=info");
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Command::Url { query, base } => {
            let (metadata, descriptor) = prepare(&query, &config)?;
            let translator = ProtocolTranslator::new(metadata, config.protocol.clone());
            let url = translator.url(&base, &descriptor)?;
            match cli.format {
                OutputFormat::Text => println!("{url}"),
                OutputFormat::Json => {
                    let request = translator.compile(&descriptor)?;
                    let params: BTreeMap<String, String> =
                        request.to_query_pairs().into_iter().collect();
                    let doc = serde_json::json!({ "url": url, "params": params });
                    println!("{}", serde_json::to_string_pretty(&doc)?);
                }
            }
        }
        Command::Run {
            query,
            records,
            local,
        } => {
            let (metadata, descriptor) = prepare(&query, &config)?;
            let data = load_records(&records)?;
            let out = if local {
                let store = MemoryStore::new().with_table(descriptor.entity_type.clone(), data);
                LocalIndexTranslator::new(metadata).query(&store, &descriptor)?
            } else {
                InMemoryTranslator::new(metadata).compile(&descriptor)?.run(data)
            };
            info!(rows = out.len(), "query.cli.run");
            let rows: Vec<serde_json::Value> = out
                .iter()
                .map(|record| Value::Object(record.clone()).to_json())
                .collect();
            match cli.format {
                OutputFormat::Text => {
                    for row in &rows {
                        println!("{row}");
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            }
        }
        Command::IndexSchema { query } => {
            let (metadata, descriptor) = prepare(&query, &config)?;
            let schema = LocalIndexTranslator::new(metadata).plan_schema(&descriptor)?;
            match cli.format {
                OutputFormat::Text => {
                    for (entity, spec) in &schema {
                        println!("{entity}: {spec}");
                    }
                }
                OutputFormat::Json => {
                    let doc: BTreeMap<&str, String> = schema
                        .iter()
                        .map(|(entity, spec)| (entity.as_str(), spec.to_string()))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&doc)?);
                }
            }
        }
    }
    Ok(())
}

fn prepare(
    args: &QueryArgs,
    config: &EngineConfig,
) -> Result<(Arc<dyn MetadataProvider>, QueryDescriptor), Box<dyn Error>> {
    let metadata: Arc<dyn MetadataProvider> = Arc::new(load_schema(&args.schema)?);
    let descriptor = QueryFile::load(&args.query)?.build(Arc::clone(&metadata), config)?;
    Ok((metadata, descriptor))
}

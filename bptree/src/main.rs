// Forbid unwrap() in production code to prevent panics from corrupt index files.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
use bptree::btree::{BPlusTree, BPlusTreeError, KEY_SIZE, make_key};
use bptree::config::TreeConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: bptree <insert KEY VALUE | search KEY | stats | verify>";

/// A parsed command-line invocation.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Insert { key: String, value: u64 },
    Search { key: String },
    Stats,
    Verify,
}

/// Keys longer than `KEY_SIZE` bytes would be truncated and collide.
fn parse_key(key: &str) -> Result<String, String> {
    if key.len() > KEY_SIZE {
        return Err(format!(
            "key '{key}' is {} bytes, at most {KEY_SIZE} are allowed",
            key.len()
        ));
    }
    Ok(key.to_string())
}

impl Command {
    fn parse(args: &[String]) -> Result<Self, String> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["insert", key, value] => {
                let key = parse_key(key)?;
                let value = value
                    .parse::<u64>()
                    .map_err(|e| format!("invalid value '{value}': {e}"))?;
                Ok(Self::Insert { key, value })
            }
            ["search", key] => Ok(Self::Search {
                key: parse_key(key)?,
            }),
            ["stats"] => Ok(Self::Stats),
            ["verify"] => Ok(Self::Verify),
            _ => Err(USAGE.to_string()),
        }
    }
}

fn run(tree: &mut BPlusTree, command: Command) -> Result<(), BPlusTreeError> {
    match command {
        Command::Insert { key, value } => match tree.try_insert(make_key(key.as_bytes()), value)? {
            None => println!("inserted {key} = {value}"),
            Some(existing) => println!("{key} already present with value {existing}"),
        },
        Command::Search { key } => match tree.search(&make_key(key.as_bytes()))? {
            Some(value) => println!("{value}"),
            None => println!("{key} not found"),
        },
        Command::Stats => {
            let stats = tree.stats();
            println!("order: {}", stats.order);
            println!("height: {}", stats.height);
            println!("internal nodes: {}", stats.internal_node_count);
            println!("leaf nodes: {}", stats.leaf_node_count);
            println!("root offset: {}", stats.root_offset);
        }
        Command::Verify => {
            let report = tree.verify()?;
            println!(
                "ok: {} entries in {} leaves and {} internal nodes, height {}",
                report.entries, report.leaf_nodes, report.internal_nodes, report.height
            );
        }
    }
    tree.sync()
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bptree=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            tracing::error!("Invalid arguments: {e}");
            std::process::exit(1);
        }
    };

    // Load configuration from environment variables
    let config = match TreeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::debug!(
        "Loaded configuration: index_path={}, order={}, force_empty={}",
        config.index_path.display(),
        config.order,
        config.force_empty
    );

    if let Some(parent) = config.index_path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        tracing::error!("Failed to create index directory: {e}");
        std::process::exit(1);
    }

    let mut tree = match BPlusTree::open_with(&config.index_path, config.force_empty, config.options()) {
        Ok(tree) => tree,
        Err(e) => {
            tracing::error!("Failed to open index {}: {e}", config.index_path.display());
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&mut tree, command) {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

use anyhow::Context;
use clap::Parser;
use csvinsight_common::{Config, OrdererKind};
use csvinsight_core::{
    export_json, open_delimited, print_report, profile_rows, profile_rows_unordered,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn parse_single_char(s: &str) -> Result<char, String> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(format!("expected a single character, got {s:?}")),
    }
}

#[derive(Parser)]
#[command(name = "csvi", version, about = "Column-by-column profiler for large delimited files")]
struct Cli {
    /// delimited input file with a header row
    path: PathBuf,
    /// TOML config file (default: $CSVINSIGHT_CONFIG or the user config dir)
    #[arg(long)]
    config: Option<PathBuf>,
    /// columns whose cells hold separator-joined lists
    #[arg(long, value_delimiter = ',')]
    list_fields: Option<Vec<String>>,
    #[arg(long)]
    list_separator: Option<String>,
    #[arg(long, value_parser = parse_single_char)]
    delimiter: Option<char>,
    /// how many most common values to report per column
    #[arg(long)]
    most_common: Option<usize>,
    #[arg(long)]
    partition_workers: Option<usize>,
    #[arg(long)]
    ordering_workers: Option<usize>,
    #[arg(long)]
    partition_rows: Option<usize>,
    /// merge | shell
    #[arg(long)]
    orderer: Option<OrdererKind>,
    /// parent directory for intermediate column files
    #[arg(long)]
    tempdir: Option<PathBuf>,
    /// also write the report as JSON
    #[arg(long)]
    json: Option<PathBuf>,
    /// single pass without uniques or most common values
    #[arg(long)]
    quick: bool,
    /// tracing filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        let profiling = &mut config.profiling;
        if let Some(fields) = &self.list_fields {
            profiling.list_columns = fields.clone();
        }
        if let Some(sep) = &self.list_separator {
            profiling.list_separator = sep.clone();
        }
        if let Some(n) = self.most_common {
            profiling.most_common = n;
        }
        if let Some(n) = self.partition_workers {
            profiling.partition_workers = n;
        }
        if let Some(n) = self.ordering_workers {
            profiling.ordering_workers = n;
        }
        if let Some(n) = self.partition_rows {
            profiling.partition_rows = n;
        }
        if let Some(kind) = self.orderer {
            profiling.orderer = kind;
        }
        if let Some(dir) = &self.tempdir {
            profiling.temp_dir = Some(dir.clone());
        }
        if let Some(d) = self.delimiter {
            config.dialect.delimiter = d;
        }
        if let Some(out) = &self.json {
            config.output.json_path = Some(out.clone());
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => Config::load().context("reading config")?,
    };
    cli.apply(&mut config);
    config.profiling.validate()?;

    let source = open_delimited(&cli.path, &config.dialect)
        .with_context(|| format!("opening {}", cli.path.display()))?;
    info!(path = %cli.path.display(), columns = source.header.len(), "profiling");

    let report = if cli.quick {
        profile_rows_unordered(source.header, source.rows, &config.profiling)?
    } else {
        profile_rows(source.header, source.rows, source.input_bytes, &config.profiling)?
    }
    .with_path(&cli.path);

    let stdout = std::io::stdout();
    print_report(&report, &mut stdout.lock())?;
    if let Some(out) = &config.output.json_path {
        export_json(out, &report).with_context(|| format!("writing {}", out.display()))?;
        info!(path = %out.display(), "json report written");
    }
    Ok(())
}

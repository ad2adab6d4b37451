use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use review_rag::models::FieldSelector;
use review_rag::pipeline::Pipeline;
use review_rag::{logging, AppConfig};

#[derive(Parser, Debug)]
#[command(name = "review-indexer")]
#[command(about = "Load the review dataset and build the field indexes")]
struct Args {
    /// Configuration file (defaults to ./review-rag.toml when present)
    #[arg(short, long, env = "REVIEW_RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Dataset to load instead of the configured one (.csv or .xlsx)
    #[arg(short, long)]
    dataset: Option<PathBuf>,

    /// Only build these fields (product_name, product_brand, site_category_lv1, site_category_lv2)
    #[arg(short, long, value_delimiter = ',')]
    fields: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(dataset) = args.dataset {
        config.store.dataset_path = dataset;
    }

    if !config.vector.backend.is_persistent() {
        anyhow::bail!(
            "vector.backend = {:?} keeps indexes in process memory; they would be lost when the indexer exits. \
             Set REVIEW_RAG__VECTOR__BACKEND=qdrant",
            config.vector.backend
        );
    }

    let fields: Vec<FieldSelector> = if args.fields.is_empty() {
        FieldSelector::ALL.to_vec()
    } else {
        args.fields
            .iter()
            .map(|f| f.parse::<FieldSelector>())
            .collect::<std::result::Result<_, _>>()?
    };

    println!("Loading dataset: {}", config.store.dataset_path.display());
    let pipeline = Pipeline::load(&config).await?;
    println!(
        "Loaded {} reviews ({} skipped), fingerprint {}",
        pipeline.report.rows_loaded, pipeline.report.rows_skipped, pipeline.report.fingerprint
    );

    let pb = ProgressBar::new(fields.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut built = Vec::new();
    let mut failed = Vec::new();

    for field in fields {
        pb.set_message(field.to_string());
        match pipeline.indexes.build_index(field).await {
            Ok(summary) => built.push(summary),
            Err(e) => {
                tracing::warn!("Failed to index {}: {}", field, e);
                failed.push((field, e.to_string()));
            }
        }
        pb.inc(1);
    }

    pb.finish_with_message("done");

    println!("\nIndexing complete!");
    for summary in &built {
        println!("  {:<20} {} entries", summary.field.to_string(), summary.entries);
    }
    println!("  Vector backend: {:?}", config.vector.backend);

    if !failed.is_empty() {
        println!("\nFailed fields:");
        for (field, err) in &failed {
            println!("  {}: {}", field, err);
        }
    }

    Ok(())
}

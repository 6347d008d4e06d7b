pub mod embed;

pub use embed::embed_once;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tokio::io::AsyncWriteExt;

use embed_server::config::ModelConfig;
use embed_server::embedding::local::{MODEL_DATA_FILE, MODEL_FILE, TOKENIZER_FILE};

const HF_BASE: &str = "https://huggingface.co/intfloat/multilingual-e5-large/resolve/main";

/// Files to fetch: (remote path under the repo, local file name, human size hint).
const MODEL_FILES: [(&str, &str, &str); 3] = [
    ("onnx/model.onnx", MODEL_FILE, "~1MB"),
    ("onnx/model.onnx_data", MODEL_DATA_FILE, "~2.2GB"),
    ("tokenizer.json", TOKENIZER_FILE, "~17MB"),
];

/// Download the ONNX embedding model and tokenizer to the cache directory.
pub async fn model_download(config: &ModelConfig) -> Result<()> {
    let cache_dir = config.resolved_cache_dir();
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("failed to create cache dir: {}", cache_dir.display()))?;

    for (remote, local, size) in MODEL_FILES {
        let dest = cache_dir.join(local);
        if dest.exists() {
            println!("{local} already exists at {}", dest.display());
            continue;
        }
        println!("Downloading {local} ({size})...");
        download_file(&format!("{HF_BASE}/{remote}"), &dest).await?;
        println!("{local} saved to {}", dest.display());
    }

    println!("Model download complete. Ready for use.");
    Ok(())
}

/// Stream a file from a URL to disk with a progress bar. Uses atomic write (tmp + rename).
async fn download_file(url: &str, dest: &Path) -> Result<()> {
    let mut response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "download failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
                    .context("invalid progress template")?
                    .progress_chars("##-"),
            );
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    while let Some(chunk) = response.chunk().await.context("error reading response")? {
        file.write_all(&chunk)
            .await
            .context("error writing to file")?;
        pb.inc(chunk.len() as u64);
    }

    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .context("failed to rename temp file")?;

    pb.finish_and_clear();
    Ok(())
}

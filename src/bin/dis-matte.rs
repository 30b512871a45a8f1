//! DIS Matte CLI Tool
//!
//! Command-line interface for removing backgrounds from images with a DIS
//! segmentation model on ONNX Runtime or Tract.

#[cfg(feature = "cli")]
use dis_matte::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(2);
}

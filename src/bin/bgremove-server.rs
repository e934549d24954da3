//! Background removal HTTP service
//!
//! Serves `POST /remove-background` backed by an ONNX segmentation model, and
//! offers one-shot processing from the command line.

use bgremove_service::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

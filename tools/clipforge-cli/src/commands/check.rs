//! Check encoder capabilities.

use clipforge_common::config::AppConfig;
use clipforge_encoder::{BackendPreference, Capability};

pub fn run(backend: Option<String>, config: &AppConfig) -> anyhow::Result<()> {
    let preference: BackendPreference = backend
        .as_deref()
        .unwrap_or(&config.export.backend)
        .parse()
        .map_err(|e: clipforge_common::ClipforgeError| anyhow::anyhow!(e.user_message()))?;

    println!("clipforge System Check");
    println!("{}", "=".repeat(50));

    let capability = Capability::detect(preference);
    match &capability {
        Capability::Supported(_) => {
            println!("[OK] Encoder backend: {} (requested: {preference})", capability.backend_name());
        }
        Capability::Unsupported { reason } => {
            println!("[FAIL] No encoder backend: {reason}");
            println!();
            println!("Install ffmpeg, or build with the `gstreamer` feature and install GStreamer.");
            return Ok(());
        }
    }

    let types = capability.supported_types();
    println!("[OK] Supported output types: {}", types.len());
    for mime in &types {
        println!("     {mime}");
    }

    println!();
    if types.is_empty() {
        println!("The backend was found but cannot produce any supported container.");
    } else {
        println!("clipforge is ready to export.");
    }

    Ok(())
}

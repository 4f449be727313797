use std::{fs, path::PathBuf};

use storefront_core::openapi::openapi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(&openapi())?;

    let output_dir = PathBuf::from("openapi");
    fs::create_dir_all(&output_dir)?;

    let output_path = output_dir.join("storefront-core.v1.json");
    fs::write(&output_path, json)?;

    println!("OpenAPI spec written to {}", output_path.display());
    Ok(())
}

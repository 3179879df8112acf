//! Writes the OpenAPI document of the Hermes API.
//!
//! Usage: `openapi [OUTPUT]`; the document goes to `openapi.json` by default.

use hermes_api::router::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openapi.json".to_string());
    std::fs::write(&path, ApiDoc::openapi().to_pretty_json()?)?;
    println!("Wrote OpenAPI document to {path}");
    Ok(())
}

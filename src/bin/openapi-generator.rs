//! Print the OpenAPI document of the HTTP API to stdout.

use anyhow::Context;
use utoipa::OpenApi;
use wyr_back::services::documentation::ApiDoc;

fn main() -> anyhow::Result<()> {
    let doc = ApiDoc::openapi();
    let json = doc.to_pretty_json().context("serialising OpenAPI document")?;
    println!("{json}");
    Ok(())
}

//! Render command - learn a template and render it once

use std::io::Write;
use std::path::Path;

use tracing::info;

use super::{GlobalOptions, connect, load_template, write_atomic};
use crate::error::Result;

pub async fn run(options: &GlobalOptions, template: &Path, output: Option<&Path>) -> Result<()> {
    let config = options.load_config()?;
    let template = load_template(template)?;

    let engine = connect(&config).await?;
    engine.learn(&template).await?;
    let rendered = engine.render(&template).await?;
    engine.close();

    match output {
        Some(path) => {
            write_atomic(path, &rendered)?;
            info!(output = %path.display(), bytes = rendered.len(), "wrote rendered template");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(rendered.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}

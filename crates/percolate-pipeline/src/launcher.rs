use std::path::Path;

use percolate_core::workspace::USER_DIR;
use percolate_core::{Entrypoint, FileRef, join_key};

use crate::error::PipelineError;

/// Marker in the launcher template replaced by the generated bootstrap.
pub const PLACEHOLDER: &str = "// PLACEHOLDER";

/// Launcher template compiled into the crate, used when none is configured.
pub const EMBEDDED_TEMPLATE: &str = include_str!("../assets/launcher.js");

/// Statements that enter the user directory, load the bundled entrypoint and
/// unwrap a default export into the `listener` binding the bridge serves.
pub fn bootstrap_statements(js_entrypoint: &Entrypoint) -> String {
    let module = join_key(&[USER_DIR, js_entrypoint.as_str()]);
    [
        format!("process.chdir(\"./{USER_DIR}\");"),
        format!("listener = require(\"./{module}\");"),
        "if (listener.default) listener = listener.default;".to_string(),
    ]
    .join(" ")
}

/// Substitute the bootstrap into `template`. A template without the marker
/// is returned unchanged.
pub fn render(template: &str, js_entrypoint: &Entrypoint) -> String {
    if !template.contains(PLACEHOLDER) {
        tracing::warn!(
            marker = PLACEHOLDER,
            "Launcher template has no marker; leaving it unchanged"
        );
    }
    template.replacen(PLACEHOLDER, &bootstrap_statements(js_entrypoint), 1)
}

/// Produce the launcher file from the template at `template_path`, or from
/// [`EMBEDDED_TEMPLATE`] when no path is given. An unreadable template is the
/// only failure.
pub async fn synthesize(
    template_path: Option<&Path>,
    js_entrypoint: &Entrypoint,
) -> Result<FileRef, PipelineError> {
    let launcher = match template_path {
        Some(path) => {
            let template = tokio::fs::read_to_string(path).await.map_err(|e| {
                PipelineError::AssemblyError(format!(
                    "cannot read launcher template {}: {e}",
                    path.display()
                ))
            })?;
            render(&template, js_entrypoint)
        }
        None => render(EMBEDDED_TEMPLATE, js_entrypoint),
    };
    Ok(FileRef::blob(launcher))
}

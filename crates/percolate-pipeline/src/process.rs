use std::ffi::OsStr;
use std::path::Path;
use std::process::Output;

/// Run `program` in `cwd` to completion and capture its output.
///
/// `NODE_ENV` is removed from the child's environment so installs pick up
/// dev dependencies. Spawn failures and non-zero exits are both returned as a
/// message carrying the command line and the captured streams.
pub async fn run_command<I, S>(program: &OsStr, args: I, cwd: &Path) -> Result<Output, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    let command_line = describe(program, &args);
    tracing::debug!(command = %command_line, cwd = %cwd.display(), "Spawning");

    let output = tokio::process::Command::new(program)
        .args(&args)
        .current_dir(cwd)
        .env_remove("NODE_ENV")
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| format!("failed to run `{command_line}`: {e}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        return Err(format!(
            "`{command_line}` exited with {}:\nstdout: {}\nstderr: {}",
            output.status,
            stdout.trim(),
            stderr.trim()
        ));
    }

    Ok(output)
}

fn describe(program: &OsStr, args: &[std::ffi::OsString]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(|a| a.as_os_str()))
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

use super::*;

/// Environment handed to the serving process.
#[derive(Debug, Clone)]
pub struct ServeEnv {
    pub db_path: PathBuf,
    pub index_path: PathBuf,
    pub emb_model: String,
    pub api_host: String,
    pub api_port: u16,
}

/// Starts the serve command once the stages are done and waits for it.
/// Returns its exit code; a signal-terminated child maps to 1.
pub fn hand_off(command: &[String], env: &ServeEnv) -> Result<i32> {
    let Some((program, rest)) = command.split_first() else {
        bail!("serve command is empty");
    };

    info!(
        program = %program,
        host = %env.api_host,
        port = env.api_port,
        "handing off to serve command"
    );

    let status = Command::new(program)
        .args(rest)
        .env("DB_PATH", &env.db_path)
        .env("INDEX_PATH", &env.index_path)
        .env("EMB_MODEL", &env.emb_model)
        .env("API_HOST", &env.api_host)
        .env("API_PORT", env.api_port.to_string())
        .status()
        .with_context(|| format!("failed to start serve command `{program}`"))?;

    if !status.success() {
        warn!(status = %status, "serve command exited unsuccessfully");
    }
    Ok(status.code().unwrap_or(1))
}

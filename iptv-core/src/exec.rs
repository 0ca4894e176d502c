use std::process::Output;

use tokio::process::Command;

/// Runs an external tool to completion.
#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<Output> {
        command.output().await
    }
}

/// Program and arguments of a command, for logs and test assertions.
pub fn describe(command: &Command) -> (String, Vec<String>) {
    let std = command.as_std();
    let program = std.get_program().to_string_lossy().into_owned();
    let args = std
        .get_args()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    (program, args)
}

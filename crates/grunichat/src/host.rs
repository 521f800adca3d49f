//! The hook into the game server process.
//!
//! The bridge doesn't know how to print a line to players or run a
//! command. The embedding application does, and exposes it by
//! implementing [`Host`].

/// Actions the bridge asks the game server to perform.
///
/// Called from the connection worker task for every dispatched inbound
/// envelope, so implementations should return quickly (queue the work if
/// it blocks).
///
/// # Example
///
/// ```rust
/// use grunichat::Host;
///
/// /// Prints everything instead of touching a real server.
/// struct EchoHost;
///
/// impl Host for EchoHost {
///     fn broadcast_line(&self, line: &str) {
///         println!("say: {line}");
///     }
///     fn execute_command(&self, command: &str) {
///         println!("host command: {command}");
///     }
///     fn execute_server_command(&self, command: &str) {
///         println!("server command: {command}");
///     }
/// }
/// ```
pub trait Host: Send + Sync + 'static {
    /// Shows `line` to everyone on the server.
    fn broadcast_line(&self, line: &str);

    /// Runs `command` through the host console (plugin commands such as
    /// `!!status`, or anything without a recognized prefix).
    fn execute_command(&self, command: &str);

    /// Runs `command` directly on the game server. The leading `/` has
    /// already been removed.
    fn execute_server_command(&self, command: &str);
}

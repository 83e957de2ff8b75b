//! Command-line options.

use camino::Utf8PathBuf;
use tracing_subscriber::filter::LevelFilter;

/// Background music-queue daemon. Clients connect over the local socket in
/// the config directory, or over TCP.
#[derive(Debug, clap::Parser)]
#[command(name = "moosicd", version, disable_version_flag = true)]
pub struct Cli {
    /// Sets the maximum size of the history list
    #[arg(short = 's', long = "history-size", value_name = "NUM")]
    pub history_size: Option<usize>,

    /// Directory where moosicd keeps the various files that it uses
    #[arg(short = 'c', long = "config", value_name = "DIR")]
    pub config: Option<Utf8PathBuf>,

    /// Listen on the given TCP port for client requests instead of using the
    /// local socket (beware: this may create network security
    /// vulnerabilities)
    #[arg(short = 't', long = "tcp", value_name = "PORT", conflicts_with = "tcp_also")]
    pub tcp: Option<u16>,

    /// Listen on the given TCP port in addition to using the local socket
    #[arg(short = 'T', long = "tcp-also", value_name = "PORT")]
    pub tcp_also: Option<u16>,

    /// Only accept TCP connections that originate from the local computer
    #[arg(short = 'l', long = "local-only")]
    pub local_only: bool,

    /// Stay in the foreground instead of detaching from the terminal
    #[arg(short = 'f', long = "foreground")]
    pub foreground: bool,

    /// Don't print any informational messages
    #[arg(short = 'q', long = "quiet", conflicts_with = "debug")]
    pub quiet: bool,

    /// Print additional informational messages
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Log to stdout instead of the server log file; implies --foreground
    #[arg(short = 'S', long = "stdout")]
    pub stdout: bool,

    /// Print version information and exit
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// Accepted but ignored, with a warning
    #[arg(hide = true)]
    pub rest: Vec<String>,
}

impl Cli {
    /// The TCP port to listen on, from either `--tcp` or `--tcp-also`.
    pub fn tcp_port(&self) -> Option<u16> {
        self.tcp.or(self.tcp_also)
    }

    /// Whether the local socket is in play. `--tcp` replaces it,
    /// `--tcp-also` keeps it.
    pub fn unix_enabled(&self) -> bool {
        self.tcp.is_none()
    }

    pub fn daemonize(&self) -> bool {
        !self.foreground && !self.stdout
    }

    pub fn verbosity(&self) -> LevelFilter {
        if self.debug {
            LevelFilter::DEBUG
        } else if self.quiet {
            LevelFilter::ERROR
        } else {
            LevelFilter::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("moosicd").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_use_the_local_socket() {
        let cli = parse(&[]);
        assert!(cli.unix_enabled());
        assert_eq!(cli.tcp_port(), None);
        assert!(cli.daemonize());
        assert_eq!(cli.verbosity(), LevelFilter::INFO);
    }

    #[test]
    fn tcp_replaces_the_local_socket_tcp_also_keeps_it() {
        let cli = parse(&["--tcp", "8765"]);
        assert!(!cli.unix_enabled());
        assert_eq!(cli.tcp_port(), Some(8765));

        let cli = parse(&["-T", "8765", "-l"]);
        assert!(cli.unix_enabled());
        assert_eq!(cli.tcp_port(), Some(8765));
        assert!(cli.local_only);
    }

    #[test]
    fn tcp_and_tcp_also_conflict() {
        assert!(
            Cli::try_parse_from(["moosicd", "-t", "1", "-T", "2"]).is_err()
        );
    }

    #[test]
    fn quiet_and_debug_conflict() {
        assert!(Cli::try_parse_from(["moosicd", "-q", "-d"]).is_err());
        assert_eq!(parse(&["-q"]).verbosity(), LevelFilter::ERROR);
        assert_eq!(parse(&["-d"]).verbosity(), LevelFilter::DEBUG);
    }

    #[test]
    fn stdout_and_foreground_disable_daemonizing() {
        assert!(!parse(&["-f"]).daemonize());
        assert!(!parse(&["-S"]).daemonize());
    }

    #[test]
    fn stray_positionals_are_collected_not_fatal() {
        let cli = parse(&["leftover", "args"]);
        assert_eq!(cli.rest, vec!["leftover", "args"]);
    }

    #[test]
    fn history_size_and_config_parse() {
        let cli = parse(&["-s", "10", "-c", "/tmp/moosic-test"]);
        assert_eq!(cli.history_size, Some(10));
        assert_eq!(cli.config.as_deref().map(|p| p.as_str()), Some("/tmp/moosic-test"));
    }
}

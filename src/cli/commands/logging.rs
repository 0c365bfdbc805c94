use clap::{Arg, ArgAction, Command};

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_JSON: &str = "log-json";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .action(ArgAction::Count)
                .help("Increase log verbosity (-v warn, -vv info, -vvv debug, -vvvv trace)"),
        )
        .arg(
            Arg::new(ARG_LOG_JSON)
                .long("log-json")
                .action(ArgAction::SetTrue)
                .env("ENCORE_LOG_JSON")
                .help("Emit logs as JSON"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_counts_occurrences() {
        let command = with_args(Command::new("test"));
        let matches = command.get_matches_from(vec!["test", "-vvv"]);
        assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(3));
    }
}

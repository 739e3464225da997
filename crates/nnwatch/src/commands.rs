// Line-oriented operator commands read from stdin.

use nnwatch_core::admin::AdminAction;
use nnwatch_core::engine::Command;
use nnwatch_core::logs::view::{LevelFilter, LogFilterPatch, LogWindow, SubsystemFilter};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("'{0}' needs an argument")]
    MissingArgument(&'static str),

    #[error("invalid value '{value}' for {field}")]
    InvalidValue { field: &'static str, value: String },
}

pub const HELP: &str = "\
commands:
  tab <overview|elo|heatmap|tournaments|logs>
  phase <opening|midgame|endgame>
  explain <version> | close
  filter [level=..] [subsystem=..] [window=latest|lastN|all] [n=..] [paused=true|false]
  admin on|off | snapshot | shutdown-backend
  retry | quit";

fn invalid(field: &'static str, value: &str) -> CommandError {
    CommandError::InvalidValue {
        field,
        value: value.to_string(),
    }
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, CommandError> {
    match value {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(invalid(field, value)),
    }
}

fn parse_filter<'a>(args: impl Iterator<Item = &'a str>) -> Result<LogFilterPatch, CommandError> {
    let mut patch = LogFilterPatch::default();
    for arg in args {
        let Some((key, value)) = arg.split_once('=') else {
            return Err(invalid("filter", arg));
        };
        match key {
            "level" => {
                let level = LevelFilter::parse(value).ok_or_else(|| invalid("level", value))?;
                patch.level = Some(level);
            }
            "subsystem" => {
                let subsystem =
                    SubsystemFilter::parse(value).ok_or_else(|| invalid("subsystem", value))?;
                patch.subsystem = Some(subsystem);
            }
            "window" => {
                let window = LogWindow::parse(value).ok_or_else(|| invalid("window", value))?;
                patch.window = Some(window);
            }
            "n" => {
                let n = value.parse::<usize>().map_err(|_| invalid("n", value))?;
                patch.n = Some(n.max(1));
            }
            "paused" => patch.paused = Some(parse_bool("paused", value)?),
            _ => return Err(invalid("filter", arg)),
        }
    }
    Ok(patch)
}

fn arg<'a>(
    words: &mut impl Iterator<Item = &'a str>,
    name: &'static str,
) -> Result<String, CommandError> {
    words
        .next()
        .map(str::to_string)
        .ok_or(CommandError::MissingArgument(name))
}

/// Parse one input line into an engine command.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err(CommandError::Empty);
    };
    let cmd = match verb {
        "tab" => Command::SetActiveTab(arg(&mut words, "tab")?),
        "phase" => Command::SetHeatmapPhase(arg(&mut words, "phase")?),
        "explain" => Command::OpenExplain(arg(&mut words, "explain")?),
        "close" => Command::CloseExplain,
        "filter" => Command::SetLogFilter(parse_filter(words)?),
        "admin" => {
            let value = arg(&mut words, "admin")?;
            Command::SetAdminEnabled(parse_bool("admin", &value)?)
        }
        "snapshot" => Command::Admin(AdminAction::Snapshot),
        "shutdown-backend" => Command::Admin(AdminAction::Shutdown),
        "retry" => Command::RetryNow,
        "quit" | "exit" => Command::Shutdown,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(cmd)
}

/// Available commands, their parser and autocomplete logic
use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand};
use color_eyre::eyre::eyre;
use color_eyre::Result;

/// A user command, shared by the one-shot CLI and the interactive shell.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Action {
  /// Show active tasks
  #[command(visible_alias = "ls")]
  List {
    /// Load subtasks of every task
    #[arg(short, long)]
    expand: bool,
    /// Bypass the cache
    #[arg(short, long)]
    refresh: bool,
  },
  /// Add a task
  #[command(visible_alias = "a")]
  Add {
    #[arg(required = true)]
    text: Vec<String>,
    /// today, tomorrow, +N or yyyy-mm-dd
    #[arg(short, long)]
    due: Option<String>,
  },
  /// Mark a task completed
  #[command(visible_alias = "d")]
  Done { task: String },
  /// Delete an active task
  #[command(visible_alias = "rm")]
  Delete { task: String },
  /// Toggle the important flag
  Star { task: String },
  /// Replace a task's text; `--due none` clears the due date
  Edit {
    task: String,
    #[arg(required = true)]
    text: Vec<String>,
    #[arg(short, long)]
    due: Option<String>,
  },
  /// Show a task's subtasks
  #[command(visible_alias = "x")]
  Expand { task: String },
  /// Manage subtasks
  #[command(subcommand)]
  Sub(SubAction),
  /// Show completed tasks
  Archive {
    #[arg(long)]
    from: Option<NaiveDate>,
    #[arg(long)]
    to: Option<NaiveDate>,
    #[arg(short, long)]
    refresh: bool,
  },
  /// Move a completed task back to the active list
  Reopen { task: String },
  /// Delete a completed task
  #[command(name = "archive-delete")]
  ArchiveDelete { task: String },
  /// Refetch the active list
  Refresh,
  /// Show cache and connection state
  Status,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum SubAction {
  Add {
    task: String,
    #[arg(required = true)]
    text: Vec<String>,
  },
  Toggle { task: String, subtask: String },
  Rename {
    task: String,
    subtask: String,
    #[arg(required = true)]
    text: Vec<String>,
  },
  Delete { task: String, subtask: String },
}

/// One line typed into the shell.
#[derive(Parser, Debug)]
#[command(name = "tdo", no_binary_name = true, disable_version_flag = true)]
struct ShellLine {
  #[command(subcommand)]
  action: Action,
}

/// Outcome of reading a shell line.
#[derive(Debug)]
pub enum Input {
  Empty,
  Quit,
  Action(Action),
  /// Not a known command; carries the closest candidates.
  Unknown(Vec<&'static Command>),
  /// A known command with bad arguments, or a help request.
  Usage(String),
}

pub fn parse_line(line: &str) -> Input {
  let words: Vec<&str> = line.split_whitespace().collect();
  let Some(first) = words.first() else {
    return Input::Empty;
  };
  if matches!(*first, "quit" | "q" | "exit") {
    return Input::Quit;
  }

  match ShellLine::try_parse_from(words.iter().copied()) {
    Ok(parsed) => Input::Action(parsed.action),
    Err(e) if is_known(first) || first.starts_with('-') || *first == "help" => {
      Input::Usage(e.render().to_string())
    }
    Err(_) => Input::Unknown(get_suggestions(first)),
  }
}

fn is_known(word: &str) -> bool {
  COMMANDS
    .iter()
    .any(|c| c.name == word || c.aliases.contains(&word))
}

/// Resolve a due-date argument. `none` clears the date.
pub fn parse_due(input: &str, today: NaiveDate) -> Result<Option<NaiveDate>> {
  let input = input.trim().to_lowercase();
  match input.as_str() {
    "none" | "" => Ok(None),
    "today" => Ok(Some(today)),
    "tomorrow" => Ok(Some(today + Duration::days(1))),
    s if s.starts_with('+') => {
      let days: i64 = s[1..]
        .parse()
        .map_err(|_| eyre!("Invalid day offset: {}", s))?;
      Duration::try_days(days)
        .and_then(|offset| today.checked_add_signed(offset))
        .map(Some)
        .ok_or_else(|| eyre!("Day offset out of range: {}", s))
    }
    s => NaiveDate::parse_from_str(s, "%Y-%m-%d")
      .map(Some)
      .map_err(|e| eyre!("Invalid date '{}': {}", s, e)),
  }
}

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "list",
    aliases: &["ls"],
    description: "Show active tasks",
  },
  Command {
    name: "add",
    aliases: &["a"],
    description: "Add a task",
  },
  Command {
    name: "done",
    aliases: &["d"],
    description: "Mark a task completed",
  },
  Command {
    name: "delete",
    aliases: &["rm"],
    description: "Delete an active task",
  },
  Command {
    name: "star",
    aliases: &[],
    description: "Toggle the important flag",
  },
  Command {
    name: "edit",
    aliases: &[],
    description: "Change a task's text or due date",
  },
  Command {
    name: "expand",
    aliases: &["x"],
    description: "Show a task's subtasks",
  },
  Command {
    name: "sub",
    aliases: &[],
    description: "Add, toggle, rename or delete subtasks",
  },
  Command {
    name: "archive",
    aliases: &[],
    description: "Show completed tasks",
  },
  Command {
    name: "reopen",
    aliases: &[],
    description: "Move a completed task back",
  },
  Command {
    name: "archive-delete",
    aliases: &[],
    description: "Delete a completed task",
  },
  Command {
    name: "refresh",
    aliases: &[],
    description: "Refetch the active list",
  },
  Command {
    name: "status",
    aliases: &[],
    description: "Show cache and connection state",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    description: "Exit the shell",
  },
];

/// Get autocomplete suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    if cmd.name == input_lower {
      matches.push((cmd, 0));
    } else if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
    } else if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
    } else if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
    } else if cmd.name.contains(&input_lower) {
      matches.push((cmd, 4));
    } else if input_lower.starts_with(cmd.name) && cmd.name.len() > 2 {
      // "listt", "adds"
      matches.push((cmd, 5));
    }
  }

  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::CommandFactory;

  fn action(line: &str) -> Action {
    match parse_line(line) {
      Input::Action(action) => action,
      other => panic!("expected action for {:?}, got {:?}", line, other),
    }
  }

  fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
  }

  #[test]
  fn test_every_listed_command_parses() {
    let cli = ShellLine::command();
    for cmd in COMMANDS.iter().filter(|c| c.name != "quit") {
      assert!(cli.find_subcommand(cmd.name).is_some(), "{}", cmd.name);
    }
  }

  #[test]
  fn test_add_joins_words_and_keeps_due() {
    assert_eq!(
      action("add buy oat milk --due tomorrow"),
      Action::Add {
        text: vec!["buy".into(), "oat".into(), "milk".into()],
        due: Some("tomorrow".into()),
      }
    );
  }

  #[test]
  fn test_alias_and_flags() {
    assert_eq!(
      action("ls -e"),
      Action::List {
        expand: true,
        refresh: false
      }
    );
    assert_eq!(action("d 2"), Action::Done { task: "2".into() });
  }

  #[test]
  fn test_nested_subtask_command() {
    assert_eq!(
      action("sub rename 1 2 call the bank"),
      Action::Sub(SubAction::Rename {
        task: "1".into(),
        subtask: "2".into(),
        text: vec!["call".into(), "the".into(), "bank".into()],
      })
    );
  }

  #[test]
  fn test_archive_range_dates() {
    assert_eq!(
      action("archive --from 2024-01-05 --to 2024-01-10"),
      Action::Archive {
        from: Some(day(2024, 1, 5)),
        to: Some(day(2024, 1, 10)),
        refresh: false,
      }
    );
  }

  #[test]
  fn test_shell_only_inputs() {
    assert!(matches!(parse_line("   "), Input::Empty));
    assert!(matches!(parse_line("exit"), Input::Quit));
    assert!(matches!(parse_line("add"), Input::Usage(_)));
    assert!(matches!(parse_line("help"), Input::Usage(_)));
  }

  #[test]
  fn test_unknown_command_suggests() {
    match parse_line("arch") {
      Input::Unknown(suggestions) => {
        assert_eq!(suggestions[0].name, "archive");
      }
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn test_empty_input_returns_all() {
    let suggestions = get_suggestions("");
    assert_eq!(suggestions.len(), COMMANDS.len());
  }

  #[test]
  fn test_exact_match() {
    let suggestions = get_suggestions("refresh");
    assert_eq!(suggestions[0].name, "refresh");
  }

  #[test]
  fn test_alias_match() {
    let suggestions = get_suggestions("x");
    assert_eq!(suggestions[0].name, "expand");
  }

  #[test]
  fn test_fuzzy_match() {
    let suggestions = get_suggestions("open");
    assert_eq!(suggestions[0].name, "reopen");
    assert_eq!(get_suggestions("listt")[0].name, "list");
  }

  #[test]
  fn test_parse_due_shortcuts() {
    let today = day(2024, 1, 31);
    assert_eq!(parse_due("today", today).unwrap(), Some(today));
    assert_eq!(parse_due("Tomorrow", today).unwrap(), Some(day(2024, 2, 1)));
    assert_eq!(parse_due("+7", today).unwrap(), Some(day(2024, 2, 7)));
    assert_eq!(parse_due("2024-03-01", today).unwrap(), Some(day(2024, 3, 1)));
    assert_eq!(parse_due("none", today).unwrap(), None);
    assert!(parse_due("+x", today).is_err());
    assert!(parse_due("+999999999", today).is_err());
    assert!(parse_due(&format!("+{}", i64::MAX), today).is_err());
    assert!(parse_due("next week", today).is_err());
  }
}

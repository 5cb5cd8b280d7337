//! Classification of console responses
//!
//! The console answers in free text, and the wording drifts between server
//! versions. All of that text matching lives here, behind [`Outcome`], so
//! rules can be revised per command kind without touching the directory.
//!
//! Rules for a command kind are tried in order against every response line,
//! and the first rule that matches any line wins. "Already" and "not found"
//! rules come before success rules so an idempotent retry is never reported
//! as a state change. Success messages name the player, so those rules only
//! accept a line that mentions the command's target; player chat (`<name> ..`)
//! is never evidence.

use shared::CommandKind;
use std::collections::HashMap;

/// Structured result of one administrative command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Applied,
    AlreadyInState,
    NotFound,
    Malformed,
    Unknown,
}

impl Outcome {
    /// Whether the server state now matches the request
    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Applied | Outcome::AlreadyInState)
    }
}

/// Matches a line that contains every needle, ignoring case.
#[derive(Debug, Clone)]
pub struct Rule {
    pub outcome: Outcome,
    needles: Vec<String>,
    names_target: bool,
}

impl Rule {
    pub fn new(outcome: Outcome, needles: &[&str]) -> Self {
        Self {
            outcome,
            needles: needles.iter().map(|n| n.to_lowercase()).collect(),
            names_target: false,
        }
    }

    /// A rule whose line must also mention the target player by name.
    pub fn naming_target(outcome: Outcome, needles: &[&str]) -> Self {
        Self {
            names_target: true,
            ..Self::new(outcome, needles)
        }
    }

    fn matches(&self, lowered: &str, target: &str) -> bool {
        self.needles.iter().all(|n| lowered.contains(n.as_str()))
            && (!self.names_target || mentions(lowered, target))
    }
}

/// The verdict plus the line that decided it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpretation {
    pub outcome: Outcome,
    pub evidence: Option<String>,
}

impl Interpretation {
    /// The deciding line without the server's log prefix
    pub fn message(&self) -> Option<&str> {
        self.evidence.as_deref().map(strip_log_prefix)
    }
}

/// Per-command rule tables.
#[derive(Debug, Clone)]
pub struct ResponseInterpreter {
    rules: HashMap<CommandKind, Vec<Rule>>,
    malformed: Vec<Rule>,
}

impl Default for ResponseInterpreter {
    fn default() -> Self {
        Self::vanilla()
    }
}

impl ResponseInterpreter {
    /// Rules for the stock server's English console messages, current and legacy.
    pub fn vanilla() -> Self {
        use Outcome::*;

        let unknown_player = Rule::new(NotFound, &["that player does not exist"]);
        let mut rules = HashMap::new();

        rules.insert(
            CommandKind::WhitelistAdd,
            vec![
                Rule::new(AlreadyInState, &["is already whitelisted"]),
                unknown_player.clone(),
                Rule::new(NotFound, &["could not add", "to the whitelist"]),
                Rule::naming_target(Applied, &["added ", "to the whitelist"]),
            ],
        );
        rules.insert(
            CommandKind::WhitelistRemove,
            vec![
                Rule::new(NotFound, &["is not whitelisted"]),
                unknown_player.clone(),
                Rule::new(NotFound, &["could not remove", "from the whitelist"]),
                Rule::naming_target(Applied, &["removed ", "from the whitelist"]),
            ],
        );
        rules.insert(
            CommandKind::Ban,
            vec![
                Rule::new(AlreadyInState, &["nothing changed", "already banned"]),
                unknown_player.clone(),
                Rule::new(NotFound, &["could not ban"]),
                Rule::naming_target(Applied, &["banned "]),
            ],
        );
        rules.insert(
            CommandKind::Pardon,
            vec![
                Rule::new(NotFound, &["nothing changed", "isn't banned"]),
                Rule::new(NotFound, &["nothing changed", "is not banned"]),
                Rule::new(NotFound, &["could not unban"]),
                Rule::naming_target(Applied, &["unbanned "]),
            ],
        );
        rules.insert(
            CommandKind::Op,
            vec![
                Rule::new(AlreadyInState, &["nothing changed", "already is an operator"]),
                unknown_player.clone(),
                Rule::new(NotFound, &["could not op"]),
                Rule::naming_target(Applied, &["made ", "a server operator"]),
                Rule::naming_target(Applied, &["opped "]),
            ],
        );
        rules.insert(
            CommandKind::Deop,
            vec![
                Rule::new(NotFound, &["nothing changed", "is not an operator"]),
                unknown_player,
                Rule::new(NotFound, &["could not de-op"]),
                Rule::naming_target(Applied, &["no longer a server operator"]),
                Rule::naming_target(Applied, &["de-opped "]),
            ],
        );
        rules.insert(
            CommandKind::Kick,
            vec![
                Rule::new(NotFound, &["no player was found"]),
                Rule::new(NotFound, &["that player cannot be found"]),
                Rule::naming_target(Applied, &["kicked "]),
            ],
        );

        let malformed = vec![
            Rule::new(Malformed, &["unknown or incomplete command"]),
            Rule::new(Malformed, &["incorrect argument for command"]),
            Rule::new(Malformed, &["expected whitespace to end one argument"]),
            Rule::new(Malformed, &["<--[here]"]),
            Rule::new(Malformed, &["usage: /"]),
        ];

        Self { rules, malformed }
    }

    /// Replaces the rule table for one command kind.
    pub fn set_rules(&mut self, kind: CommandKind, rules: Vec<Rule>) {
        self.rules.insert(kind, rules);
    }

    fn rules_for(&self, kind: CommandKind) -> impl Iterator<Item = &Rule> {
        self.rules
            .get(&kind)
            .into_iter()
            .flatten()
            .chain(self.malformed.iter())
    }

    /// Classifies the lines that followed a command of `kind` against `target`.
    pub fn interpret(&self, kind: CommandKind, target: &str, output: &[String]) -> Interpretation {
        let target = target.to_lowercase();
        let lowered: Vec<Option<String>> = output.iter().map(|l| server_line(l)).collect();

        for rule in self.rules_for(kind) {
            let hit = lowered
                .iter()
                .position(|line| line.as_deref().map_or(false, |l| rule.matches(l, &target)));
            if let Some(index) = hit {
                return Interpretation {
                    outcome: rule.outcome,
                    evidence: Some(output[index].clone()),
                };
            }
        }

        Interpretation {
            outcome: Outcome::Unknown,
            evidence: None,
        }
    }

    /// Whether `line` settles the response to a command of `kind` against `target`.
    pub fn is_conclusive(&self, kind: CommandKind, target: &str, line: &str) -> bool {
        let Some(lowered) = server_line(line) else {
            return false;
        };
        let target = target.to_lowercase();
        self.rules_for(kind).any(|rule| rule.matches(&lowered, &target))
    }
}

/// The lowercased message, or `None` for player chat.
fn server_line(line: &str) -> Option<String> {
    let message = strip_log_prefix(line).trim_start();
    if message.starts_with('<') {
        return None;
    }
    Some(message.to_lowercase())
}

/// Whether `name` occurs in `line` as a whole player name.
fn mentions(line: &str, name: &str) -> bool {
    let is_name_char = |c: char| c.is_alphanumeric() || c == '_';
    !name.is_empty()
        && line.match_indices(name).any(|(start, _)| {
            let before = line[..start].chars().next_back();
            let after = line[start + name.len()..].chars().next();
            !before.map_or(false, is_name_char) && !after.map_or(false, is_name_char)
        })
}

/// Drops a leading `[time] [thread/LEVEL]: ` prefix if there is one.
pub fn strip_log_prefix(line: &str) -> &str {
    if line.starts_with('[') {
        if let Some(pos) = line.find("]: ") {
            return &line[pos + 3..];
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|l| l.to_string()).collect()
    }

    fn outcome(kind: CommandKind, raw: &[&str]) -> Outcome {
        outcome_for(kind, "Steve", raw)
    }

    fn outcome_for(kind: CommandKind, target: &str, raw: &[&str]) -> Outcome {
        ResponseInterpreter::vanilla()
            .interpret(kind, target, &lines(raw))
            .outcome
    }

    #[test]
    fn test_whitelist_add() {
        assert_eq!(
            outcome(
                CommandKind::WhitelistAdd,
                &["[12:00:01] [Server thread/INFO]: Added Steve to the whitelist"]
            ),
            Outcome::Applied
        );
        assert_eq!(
            outcome(CommandKind::WhitelistAdd, &["Player is already whitelisted"]),
            Outcome::AlreadyInState
        );
        assert_eq!(
            outcome(CommandKind::WhitelistAdd, &["That player does not exist"]),
            Outcome::NotFound
        );
    }

    #[test]
    fn test_whitelist_remove_absent_player() {
        assert_eq!(
            outcome(CommandKind::WhitelistRemove, &["Player is not whitelisted"]),
            Outcome::NotFound
        );
        assert_eq!(
            outcome_for(CommandKind::WhitelistRemove, "Zed", &["Removed Zed from the whitelist"]),
            Outcome::Applied
        );
    }

    #[test]
    fn test_already_beats_success_regardless_of_line_order() {
        assert_eq!(
            outcome(
                CommandKind::Ban,
                &["Banned Steve: griefing", "Nothing changed. The player is already banned"]
            ),
            Outcome::AlreadyInState
        );
    }

    #[test]
    fn test_ban_pardon() {
        assert_eq!(outcome(CommandKind::Ban, &["Banned Steve: griefing"]), Outcome::Applied);
        assert_eq!(outcome(CommandKind::Pardon, &["Unbanned Steve"]), Outcome::Applied);
        assert_eq!(
            outcome(CommandKind::Pardon, &["Nothing changed. The player isn't banned"]),
            Outcome::NotFound
        );
    }

    #[test]
    fn test_op_deop_do_not_confuse_each_other() {
        assert_eq!(
            outcome(CommandKind::Op, &["Made Steve a server operator"]),
            Outcome::Applied
        );
        assert_eq!(
            outcome(CommandKind::Deop, &["Made Steve no longer a server operator"]),
            Outcome::Applied
        );
        assert_eq!(
            outcome(CommandKind::Op, &["Nothing changed. The player already is an operator"]),
            Outcome::AlreadyInState
        );
        assert_eq!(
            outcome(CommandKind::Deop, &["Nothing changed. The player is not an operator"]),
            Outcome::NotFound
        );
        assert_eq!(outcome(CommandKind::Op, &["Opped Steve"]), Outcome::Applied);
        assert_eq!(outcome(CommandKind::Deop, &["De-opped Steve"]), Outcome::Applied);
    }

    #[test]
    fn test_kick() {
        assert_eq!(outcome(CommandKind::Kick, &["Kicked Steve: bye"]), Outcome::Applied);
        assert_eq!(outcome(CommandKind::Kick, &["No player was found"]), Outcome::NotFound);
    }

    #[test]
    fn test_malformed_and_unknown() {
        assert_eq!(
            outcome(
                CommandKind::WhitelistAdd,
                &["Unknown or incomplete command, see below for error", "whitelist add<--[HERE]"]
            ),
            Outcome::Malformed
        );
        assert_eq!(outcome(CommandKind::Op, &["<Alex> hi"]), Outcome::Unknown);
        assert_eq!(outcome(CommandKind::Op, &[]), Outcome::Unknown);
    }

    #[test]
    fn test_evidence_and_message() {
        let verdict = ResponseInterpreter::vanilla().interpret(
            CommandKind::Pardon,
            "Steve",
            &lines(&["<Alex> hi", "[09:14:55] [Server thread/INFO]: Unbanned Steve"]),
        );
        assert_eq!(verdict.outcome, Outcome::Applied);
        assert_eq!(verdict.message(), Some("Unbanned Steve"));
    }

    #[test]
    fn test_is_conclusive() {
        let interpreter = ResponseInterpreter::vanilla();
        let op = CommandKind::Op;
        assert!(interpreter.is_conclusive(op, "Steve", "Made Steve a server operator"));
        assert!(interpreter.is_conclusive(op, "Steve", "Unknown or incomplete command"));
        assert!(!interpreter.is_conclusive(op, "Steve", "<Alex> hi"));
        assert!(!interpreter.is_conclusive(op, "Bob", "Made Steve a server operator"));
    }

    #[test]
    fn test_custom_rules_replace_vanilla() {
        let mut interpreter = ResponseInterpreter::vanilla();
        interpreter.set_rules(
            CommandKind::Kick,
            vec![Rule::new(Outcome::Applied, &["disconnected", "by an operator"])],
        );
        let verdict = interpreter.interpret(
            CommandKind::Kick,
            "Steve",
            &lines(&["Steve was disconnected by an operator"]),
        );
        assert_eq!(verdict.outcome, Outcome::Applied);
        assert_eq!(
            interpreter
                .interpret(CommandKind::Kick, "Steve", &lines(&["Kicked Steve"]))
                .outcome,
            Outcome::Unknown
        );
    }

    #[test]
    fn test_success_must_name_the_target() {
        // A late reply to an earlier command
        assert_eq!(
            outcome_for(CommandKind::Op, "Bob", &["Made Steve a server operator"]),
            Outcome::Unknown
        );
        // Prefix of another name is not a mention
        assert_eq!(
            outcome_for(CommandKind::Ban, "Steve", &["Banned Steve2: spam"]),
            Outcome::Unknown
        );
        assert_eq!(
            outcome_for(CommandKind::Ban, "steve", &["Banned Steve: spam"]),
            Outcome::Applied
        );
    }

    #[test]
    fn test_chat_is_never_evidence() {
        assert_eq!(
            outcome_for(
                CommandKind::Op,
                "Bob",
                &["[12:00:02] [Server thread/INFO]: <Alex> lol Made Bob a server operator"]
            ),
            Outcome::Unknown
        );
        assert_eq!(
            outcome_for(
                CommandKind::WhitelistAdd,
                "Bob",
                &["<Alex> Player is already whitelisted", "Added Bob to the whitelist"]
            ),
            Outcome::Applied
        );
    }

    #[test]
    fn test_strip_log_prefix() {
        assert_eq!(
            strip_log_prefix("[12:00:01] [Server thread/INFO]: Added Steve to the whitelist"),
            "Added Steve to the whitelist"
        );
        assert_eq!(strip_log_prefix("Added Steve"), "Added Steve");
    }
}

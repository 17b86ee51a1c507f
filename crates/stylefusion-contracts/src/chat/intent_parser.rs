use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SINGLE_PATH_COMMANDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            command_args: BTreeMap::new(),
        }
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

// Unquoted paths with spaces are rejoined rather than truncated.
fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    let Some(slash_tail) = raw_trimmed.strip_prefix('/') else {
        let mut intent = Intent::new("unknown", text);
        intent
            .command_args
            .insert("arg".to_string(), Value::String(raw_trimmed.to_string()));
        return intent;
    };

    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
        let key = if action == "set_model" { "model" } else { "role" };
        let mut intent = Intent::new(action, text);
        intent
            .command_args
            .insert(key.to_string(), Value::String(arg.to_string()));
        return intent;
    }

    if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
        let mut intent = Intent::new(action, text);
        intent.command_args.insert(
            "path".to_string(),
            Value::String(parse_single_path_arg(arg)),
        );
        return intent;
    }

    if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
        return Intent::new(action, text);
    }

    let mut intent = Intent::new("unknown", text);
    intent
        .command_args
        .insert("command".to_string(), Value::String(command));
    intent
        .command_args
        .insert("arg".to_string(), Value::String(arg.to_string()));
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn parse_image_slot_commands() {
        let person = parse_intent("/person \"/tmp/me at beach.jpg\"");
        assert_eq!(person.action, "load_person");
        assert_eq!(person.command_args["path"], json!("/tmp/me at beach.jpg"));

        let clothing = parse_intent("  /clothing   jacket.png  ");
        assert_eq!(clothing.action, "load_clothing");
        assert_eq!(clothing.arg_str("path"), Some("jacket.png"));

        assert_eq!(parse_intent("/outfit a.png").action, "load_clothing");
    }

    #[test]
    fn parse_unquoted_path_with_spaces() {
        let person = parse_intent("/person /tmp/my photo.png");
        assert_eq!(person.command_args["path"], json!("/tmp/my photo.png"));
    }

    #[test]
    fn parse_download_with_and_without_dir() {
        let bare = parse_intent("/download");
        assert_eq!(bare.action, "download");
        assert_eq!(bare.arg_str("path"), None);

        let with_dir = parse_intent("/download out/looks");
        assert_eq!(with_dir.arg_str("path"), Some("out/looks"));
    }

    #[test]
    fn parse_raw_arg_commands() {
        let model = parse_intent("/model gemini-3-pro-image-preview");
        assert_eq!(model.action, "set_model");
        assert_eq!(model.command_args["model"], json!("gemini-3-pro-image-preview"));

        let remove = parse_intent("/remove clothing");
        assert_eq!(remove.action, "remove");
        assert_eq!(remove.arg_str("role"), Some("clothing"));
    }

    #[test]
    fn parse_no_arg_commands_and_aliases() {
        assert_eq!(parse_intent("/generate").action, "generate");
        assert_eq!(parse_intent("/COMBINE").action, "generate");
        assert_eq!(parse_intent("/reset").action, "reset");
        assert_eq!(parse_intent("/status").action, "status");
        assert_eq!(parse_intent("/models").action, "list_models");
        assert_eq!(parse_intent("/exit").action, "quit");
    }

    #[test]
    fn parse_noop_and_unknown() {
        assert_eq!(parse_intent("   ").action, "noop");

        let unknown = parse_intent("/magic foo bar");
        assert_eq!(unknown.action, "unknown");
        assert_eq!(unknown.command_args["command"], json!("magic"));
        assert_eq!(unknown.command_args["arg"], json!("foo bar"));

        let plain = parse_intent("make it red");
        assert_eq!(plain.action, "unknown");
        assert_eq!(plain.arg_str("arg"), Some("make it red"));
    }
}

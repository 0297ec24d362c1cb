//! Tokenizes the free-form `customCommand` field.
//!
//! Unlike `template_args::split_template_args` (which honors
//! quote grouping for advanced preset templates meant to be hand-edited),
//! this field requires a strictly literal split on ASCII whitespace with
//! **no** shell interpretation whatsoever: every whitespace-delimited token
//! becomes exactly one argv element, verbatim, so that shell metacharacters
//! (`;`, `|`, `&&`, `` ` ``, `$()`, `<`, `>`) can never start a new command.

pub(super) fn split_custom_command(raw: &str) -> Vec<String> {
    raw.split_ascii_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_ascii_whitespace_only() {
        let tokens = split_custom_command("-c:v libx264; echo PWNED");
        assert_eq!(
            tokens,
            vec!["-c:v", "libx264;", "echo", "PWNED"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn preserves_shell_metacharacters_inside_a_single_token() {
        let tokens = split_custom_command("$(rm -rf /)");
        assert_eq!(tokens, vec!["$(rm".to_string(), "-rf".to_string(), "/)".to_string()]);
        // No token is itself a shell operator that could start a new command;
        // ';' / '|' / '&&' only ever appear embedded inside a token produced
        // above, never as a standalone argv element introduced by us.
    }

    #[test]
    fn empty_command_yields_no_tokens() {
        assert!(split_custom_command("   ").is_empty());
        assert!(split_custom_command("").is_empty());
    }
}

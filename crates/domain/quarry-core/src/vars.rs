use std::collections::BTreeMap;

/// Replaces `$NAME` tokens, instance variables first, then the given environment.
///
/// Both passes are plain textual replacement, so an instance variable shadows an
/// environment variable of the same name: by the time the environment pass runs
/// the token is already gone.
pub fn substitute_variables<I>(template: &str, instance: &BTreeMap<String, String>, env: I) -> String
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut out = template.to_string();
    // Longest names first so `$INST_DIR` isn't eaten by `$INST`.
    let mut names: Vec<&String> = instance.keys().collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()));
    for name in names {
        out = out.replace(&format!("${name}"), &instance[name]);
    }

    let mut env: Vec<(String, String)> = env.into_iter().collect();
    env.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    for (name, value) in env {
        if name.is_empty() {
            continue;
        }
        out = out.replace(&format!("${name}"), &value);
    }
    out
}

/// The current process environment, skipping entries that are not valid UTF-8.
pub fn process_env() -> impl Iterator<Item = (String, String)> {
    std::env::vars_os().filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn instance_variables_shadow_environment() {
        let instance = vars(&[("INST_DIR", "/srv/alpha")]);
        let env = vec![
            ("INST_DIR".to_string(), "/wrong".to_string()),
            ("HOME".to_string(), "/home/op".to_string()),
        ];
        let out = substitute_variables("cd $INST_DIR && ls $HOME", &instance, env);
        assert_eq!(out, "cd /srv/alpha && ls /home/op");
    }

    #[test]
    fn longer_names_win_over_prefixes() {
        let instance = vars(&[("INST", "short"), ("INST_DIR", "long")]);
        let out = substitute_variables("$INST_DIR/$INST", &instance, Vec::new());
        assert_eq!(out, "long/short");
    }

    #[test]
    fn unknown_tokens_are_left_alone() {
        let out = substitute_variables("java $NOPE", &BTreeMap::new(), Vec::new());
        assert_eq!(out, "java $NOPE");
    }
}

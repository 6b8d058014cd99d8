/// Ordered secret -> replacement substitutions applied to every log line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CensorFilter {
    entries: Vec<(String, String)>,
}

impl CensorFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a substitution. Empty secrets are ignored, they would match everywhere.
    pub fn insert(&mut self, secret: impl Into<String>, replacement: impl Into<String>) {
        let secret = secret.into();
        if secret.is_empty() {
            return;
        }
        let replacement = replacement.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == secret) {
            entry.1 = replacement;
        } else {
            self.entries.push((secret, replacement));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn apply(&self, line: &str) -> String {
        let mut out = line.to_string();
        for (secret, replacement) in &self.entries {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), replacement);
            }
        }
        out
    }
}

impl<K, V> FromIterator<(K, V)> for CensorFilter
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut filter = CensorFilter::new();
        for (k, v) in iter {
            filter.insert(k, v);
        }
        filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_replaced_everywhere() {
        let filter: CensorFilter = [("secret", "***")].into_iter().collect();
        assert_eq!(filter.apply("token=secret123"), "token=***123");
        assert_eq!(filter.apply("secret secret"), "*** ***");
    }

    #[test]
    fn substitutions_run_in_insertion_order() {
        let filter: CensorFilter = [("abc", "x"), ("xd", "Y")].into_iter().collect();
        assert_eq!(filter.apply("abcd"), "Y");
    }

    #[test]
    fn empty_secret_is_rejected() {
        let mut filter = CensorFilter::new();
        filter.insert("", "nope");
        assert!(filter.is_empty());
        assert_eq!(filter.apply("plain"), "plain");
    }
}

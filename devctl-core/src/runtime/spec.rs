use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// How to launch one plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginSpec {
    pub id: String,
    pub path: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Working directory of the child. Empty means inherit.
    pub workdir: PathBuf,
    pub priority: i64,
}

impl PluginSpec {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Run order: lower priority first, ties broken by id.
    pub fn run_order(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.id.cmp(&other.id))
    }
}

pub fn sort_specs(specs: &mut [PluginSpec]) {
    specs.sort_by(PluginSpec::run_order);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_priority_then_id() {
        let mut specs = vec![
            PluginSpec { priority: 10, ..PluginSpec::new("b", "/bin/b") },
            PluginSpec { priority: 5, ..PluginSpec::new("c", "/bin/c") },
            PluginSpec { priority: 10, ..PluginSpec::new("a", "/bin/a") },
        ];
        sort_specs(&mut specs);
        let ids: Vec<_> = specs.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }
}

use crate::diff::Scope;

/// Attributes that changed in one part of a system while handling one
/// message. Attribute names are the dotted JSON paths of the changed leaves,
/// e.g. `status.period.hsp`.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub system_id: String,
    pub scope: Scope,
    pub attributes: Vec<String>,
}

impl Change {
    /// True if `name` is one of the changed attributes, either as the full
    /// path or as its last segment.
    pub fn touches(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| attribute_matches(a, name))
    }
}

fn attribute_matches(path: &str, name: &str) -> bool {
    path == name || path.rsplit('.').next() == Some(name)
}

/// Selects which changes an observer hears about. The default filter
/// matches everything.
#[derive(Debug, Clone, Default)]
pub struct ChangeFilter {
    system_id: Option<String>,
    scope: Option<Scope>,
    attributes: Option<Vec<String>>,
}

impl ChangeFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn system(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = Some(system_id.into());
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn zone(self, zone_id: u8) -> Self {
        self.scope(Scope::Zone(zone_id))
    }

    pub fn attributes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn matches(&self, change: &Change) -> bool {
        if let Some(ref id) = self.system_id
            && *id != change.system_id
        {
            return false;
        }
        if let Some(scope) = self.scope
            && scope != change.scope
        {
            return false;
        }
        match &self.attributes {
            Some(names) => names.iter().any(|n| change.touches(n)),
            None => !change.attributes.is_empty(),
        }
    }
}

pub(crate) type ChangeCallback = Box<dyn Fn(&Change) + Send + Sync>;

pub(crate) struct Observer {
    pub filter: ChangeFilter,
    pub callback: ChangeCallback,
}

impl Observer {
    pub fn notify(&self, change: &Change) {
        if self.filter.matches(change) {
            (self.callback)(change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(scope: Scope, attrs: &[&str]) -> Change {
        Change {
            system_id: "LCC".into(),
            scope,
            attributes: attrs.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn any_filter_matches_nonempty() {
        let f = ChangeFilter::any();
        assert!(f.matches(&change(Scope::System, &["status.diagLevel"])));
        assert!(!f.matches(&change(Scope::System, &[])));
    }

    #[test]
    fn attribute_matches_leaf_or_full_path() {
        let c = change(Scope::Zone(0), &["status.period.hsp"]);
        assert!(ChangeFilter::any().attributes(["hsp"]).matches(&c));
        assert!(ChangeFilter::any().attributes(["status.period.hsp"]).matches(&c));
        assert!(!ChangeFilter::any().attributes(["period"]).matches(&c));
        assert!(!ChangeFilter::any().attributes(["csp"]).matches(&c));
    }

    #[test]
    fn scope_and_system_filters() {
        let c = change(Scope::Zone(1), &["status.temperature"]);
        assert!(ChangeFilter::any().zone(1).matches(&c));
        assert!(!ChangeFilter::any().zone(0).matches(&c));
        assert!(!ChangeFilter::any().system("other").matches(&c));
        assert!(ChangeFilter::any().system("LCC").scope(Scope::Zone(1)).matches(&c));
    }
}

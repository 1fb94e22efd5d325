/// One concrete way of locating an element in the remote UI.
///
/// Strategy names follow the WebDriver/Appium wire protocol, but callers
/// normally build selectors from prefix strings (`"id:..."`, `"desc:..."`,
/// `"//..."`) the same way chains are written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Native resource identifier (most stable).
    Id(String),
    /// Accessibility id / content description.
    AccessibilityId(String),
    /// Visible text content.
    Text(String),
    /// XPath-like structural query.
    XPath(String),
    /// Backend-native automator expression (e.g. a UiSelector program).
    Automator(String),
    /// Widget class name.
    ClassName(String),
    /// Represents an invalid selector string, with a reason.
    Invalid(String),
}

impl Selector {
    /// Short strategy tag used in logs and errors. The exact wire-protocol
    /// mapping lives in the backend client.
    pub fn strategy(&self) -> &'static str {
        match self {
            Selector::Id(_) => "id",
            Selector::AccessibilityId(_) => "accessibility id",
            Selector::Text(_) => "text",
            Selector::XPath(_) => "xpath",
            Selector::Automator(_) => "automator",
            Selector::ClassName(_) => "class name",
            Selector::Invalid(_) => "invalid",
        }
    }

    /// Raw strategy value sent to the backend.
    pub fn value(&self) -> &str {
        match self {
            Selector::Id(v)
            | Selector::AccessibilityId(v)
            | Selector::Text(v)
            | Selector::XPath(v)
            | Selector::Automator(v)
            | Selector::ClassName(v)
            | Selector::Invalid(v) => v,
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{:?}", self.strategy(), self.value())
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        let s = s.trim();
        match s {
            _ if s.starts_with("id:") => Selector::Id(s[3..].to_string()),
            _ if s.starts_with("desc:") => Selector::AccessibilityId(s[5..].to_string()),
            _ if s.starts_with("aid:") => Selector::AccessibilityId(s[4..].to_string()),
            _ if s.starts_with("text:") => Selector::Text(s[5..].to_string()),
            _ if s.starts_with("xpath:") => Selector::XPath(s[6..].to_string()),
            _ if s.starts_with("automator:") => Selector::Automator(s[10..].to_string()),
            _ if s.to_lowercase().starts_with("classname:") => {
                Selector::ClassName(s[10..].to_string())
            }
            // Bare XPath queries are common enough to accept without a prefix.
            _ if s.starts_with("//") || s.starts_with('(') => Selector::XPath(s.to_string()),
            _ if s.starts_with('#') => Selector::Id(s[1..].to_string()),
            _ => Selector::Invalid(format!(
                "Unknown selector format: {s:?}. Use prefixes like 'id:', 'desc:', 'text:', 'xpath:', 'automator:' or 'classname:' to specify the strategy."
            )),
        }
    }
}

/// An ordered, immutable chain of alternative ways to find "the element
/// meaning X". Candidates are tried strictly in order, most stable first.
#[derive(Debug, Clone)]
pub struct LocatorSpec {
    /// Logical name of the element this spec resolves, used in errors/logs.
    pub name: String,
    pub candidates: Vec<Selector>,
}

impl LocatorSpec {
    pub fn new(name: impl Into<String>, candidates: Vec<Selector>) -> Self {
        Self {
            name: name.into(),
            candidates,
        }
    }

    /// Build a spec from prefix-string candidates, preserving order.
    pub fn parse(name: impl Into<String>, candidates: &[&str]) -> Self {
        Self {
            name: name.into(),
            candidates: candidates.iter().map(|s| Selector::from(*s)).collect(),
        }
    }
}

use super::{NO_CONTEXT, Report, ReportKind};

/// An owned copy of a [`Report`].
///
/// Building one allocates, so handlers that may run on the crash path
/// should avoid it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnedReport {
    /// What triggered the report.
    pub kind: ReportKind,
    /// The fingerprint.
    pub id: String,
    /// Source file of the failure.
    pub file: String,
    /// Source line of the failure.
    pub line: u32,
    /// Source column of the failure.
    pub column: u32,
    /// The enclosing function.
    pub function: String,
    /// The failed expression.
    pub expression: String,
    /// The raw format string.
    pub format: String,
    /// The formatted message.
    pub message: String,
    /// Whether the failure is fatal.
    pub fatal: bool,
    /// Active contexts, outermost first.
    pub contexts: Vec<&'static str>,
    /// Attributes in the order they were set.
    pub attributes: Vec<(String, String)>,
    /// Breadcrumbs, oldest first.
    pub breadcrumbs: Vec<OwnedBreadcrumb>,
    /// Return addresses, innermost first.
    pub backtrace: Vec<usize>,
}

/// An owned copy of a breadcrumb.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnedBreadcrumb {
    /// The breadcrumb name.
    pub name: String,
    /// Metadata pairs in recorded order.
    pub metadata: Vec<(String, String)>,
    /// How many consecutive times the breadcrumb was added.
    pub repeat_count: u32,
}

impl OwnedReport {
    /// The innermost context.
    pub fn responsible_context(&self) -> Option<&'static str> {
        self.contexts.last().copied()
    }

    /// The context name used in the fingerprint.
    pub fn context_or_none(&self) -> &'static str {
        self.responsible_context().unwrap_or(NO_CONTEXT)
    }

    /// Looks up an attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, value)| value.as_str())
    }

    /// The names of all breadcrumbs, oldest first.
    pub fn breadcrumb_names(&self) -> Vec<&str> {
        self.breadcrumbs.iter().map(|crumb| crumb.name.as_str()).collect()
    }
}

impl From<&Report<'_>> for OwnedReport {
    fn from(report: &Report<'_>) -> Self {
        Self {
            kind: report.kind,
            id: report.id.to_owned(),
            file: report.location.file().to_owned(),
            line: report.location.line(),
            column: report.location.column(),
            function: report.function.to_owned(),
            expression: report.expression.to_owned(),
            format: report.format.to_owned(),
            message: report.message.to_owned(),
            fatal: report.fatal,
            contexts: report.contexts.to_vec(),
            attributes: report
                .attributes
                .iter()
                .map(|(key, value)| (key.to_owned(), value.to_owned()))
                .collect(),
            breadcrumbs: report
                .breadcrumbs
                .iter()
                .map(|breadcrumb| OwnedBreadcrumb {
                    name: breadcrumb.name().to_owned(),
                    metadata: breadcrumb
                        .metadata()
                        .map(|(key, value)| (key.to_owned(), value.to_owned()))
                        .collect(),
                    repeat_count: breadcrumb.repeat_count(),
                })
                .collect(),
            backtrace: report.backtrace.to_vec(),
        }
    }
}

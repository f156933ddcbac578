use indicatif::ProgressStyle;

/// Extension trait for progress bars carrying a fixed-width label.
pub trait NamedProgress {
    /// Creates a bar style prefixed with `name`, padded to a common width.
    fn named_bar(name: &str) -> Self;
}

impl NamedProgress for ProgressStyle {
    fn named_bar(name: &str) -> Self {
        let template = format!(
            "{:<24} {{wide_bar:40.green/white}} {{pos:>5}}/{{len:<5}} [{{elapsed_precise}} ({{eta}} left)] {{msg}}",
            name
        );
        ProgressStyle::default_bar()
            .template(&template)
            .unwrap_or(ProgressStyle::default_bar())
    }
}

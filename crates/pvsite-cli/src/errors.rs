use console::style;
use std::fmt;
use std::path::Path;

/// Error with suggestions on how to fix it
pub struct CliError {
    pub message: String,
    pub context: Option<String>,
    pub suggestions: Vec<String>,
    pub help_command: Option<String>,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
            help_command: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_help(mut self, command: impl Into<String>) -> Self {
        self.help_command = Some(command.into());
        self
    }

    pub fn display(&self) {
        eprintln!("{} {}\n", style("✗").red().bold(), style(&self.message).red().bold());

        if let Some(ref context) = self.context {
            eprintln!("{}", context);
            eprintln!();
        }

        if !self.suggestions.is_empty() {
            eprintln!("{}", style("To fix this:").yellow().bold());
            for (i, suggestion) in self.suggestions.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, suggestion);
            }
            eprintln!();
        }

        if let Some(ref help_cmd) = self.help_command {
            eprintln!("{} {}", style("Need help?").cyan(), style(help_cmd).cyan().bold());
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Debug for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// The configured shapefile does not exist
pub fn shapefile_not_found(path: &Path) -> CliError {
    CliError::new("Shapefile not found")
        .with_context(format!("The farm footprints could not be found.\n\nPath: {}", path.display()))
        .with_suggestion("Pass the file: pvsite --shapefile farms.shp <command>")
        .with_suggestion("Or set `shapefile` in pvsite.toml or PVSITE_SHAPEFILE")
        .with_help("Run: pvsite status --verbose")
}

/// No farm passed the land cover check, nothing to download
pub fn no_valid_farms(memo: &Path) -> CliError {
    CliError::new("No valid farms")
        .with_context(format!(
            "The land cover check left no farm to download.\n\nValid-index file: {}",
            memo.display()
        ))
        .with_suggestion("Download the land cover rasters first: pvsite landcover")
        .with_suggestion("Recompute the verdicts: pvsite filter --refresh")
        .with_help("Run: pvsite filter --help")
}

/// Some downloads failed
pub fn downloads_failed(product: &str, count: usize) -> CliError {
    CliError::new(format!("{} {} request(s) failed", count, product))
        .with_context("The other requests were processed; existing files are skipped on the next run.")
        .with_suggestion("Run the same command again to retry the failed requests")
        .with_suggestion("Raise the log level for details: RUST_LOG=debug")
}

/// Convert an error into a CliError with suggestions where the cause is recognisable
pub fn from_anyhow(error: &anyhow::Error) -> CliError {
    if let Some(cli_error) = error.downcast_ref::<CliError>() {
        return CliError {
            message: cli_error.message.clone(),
            context: cli_error.context.clone(),
            suggestions: cli_error.suggestions.clone(),
            help_command: cli_error.help_command.clone(),
        };
    }

    let message = format!("{:#}", error);
    if message.contains("401") || message.contains("403") {
        CliError::new("Not authorized by the openEO backend")
            .with_context(format!("Error: {}", message))
            .with_suggestion("Set PVSITE_TOKEN to an openEO bearer token")
            .with_suggestion("Or set PVSITE_USERNAME and PVSITE_PASSWORD for basic authentication")
    } else if message.contains("No such file or directory") {
        CliError::new("File not found")
            .with_context(format!("Error: {}", message))
            .with_suggestion("Check the configured paths: pvsite status --verbose")
    } else {
        CliError::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_error_survives_anyhow() {
        let error = anyhow::Error::new(no_valid_farms(Path::new("aux_files/LCLU_valid_idx.txt")));
        let converted = from_anyhow(&error);

        assert_eq!(converted.message, "No valid farms");
        assert_eq!(converted.suggestions.len(), 2);
    }

    #[test]
    fn test_authorization_hint() {
        let error = anyhow::anyhow!("openEO backend returned 401: [AuthenticationRequired] Unauthorized");
        let converted = from_anyhow(&error);
        assert!(converted.message.contains("Not authorized"));
    }
}

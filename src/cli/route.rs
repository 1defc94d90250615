//! CLI route: single route table and run context. Dispatches to domain services and presentation.

use crate::cli::parse::Commands;
use crate::cli::presentation::{
    format_capture_report, format_resource_policies, format_validation_errors, ResourcePolicies,
};
use crate::config::{AmbitConfig, ConfigLoader, ContextServiceDescriptor};
use crate::error::{AmbitError, ConfigurationError};
use crate::registry::Registry;
use crate::setup::ContextSetup;
use crate::wire::inspect_capture;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Runtime context for CLI execution: workspace, config path, and the
/// context type registry commands resolve against.
pub struct RunContext {
    workspace_root: PathBuf,
    config_path: Option<PathBuf>,
    registry: Registry,
}

impl RunContext {
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, AmbitError> {
        if !workspace_root.is_dir() {
            return Err(ConfigurationError::Load(format!(
                "Workspace directory not found: {}",
                workspace_root.display()
            ))
            .into());
        }
        Ok(Self {
            workspace_root,
            config_path,
            registry: Registry::with_standard_types(),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn execute(&self, command: &Commands) -> Result<String, AmbitError> {
        let started = Instant::now();
        let result = match command {
            Commands::Inspect {
                capture,
                format,
                preview_bytes,
            } => self.handle_inspect(capture, format, *preview_bytes),
            Commands::CheckConfig { format } => self.handle_check_config(format),
        };
        debug!(
            command = command.name(),
            ok = result.is_ok(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Command finished"
        );
        result
    }

    fn handle_inspect(
        &self,
        capture: &Path,
        format: &str,
        preview_bytes: usize,
    ) -> Result<String, AmbitError> {
        let file = File::open(capture)?;
        let report = inspect_capture(BufReader::new(file), &self.registry, preview_bytes)?;
        info!(
            capture = %capture.display(),
            records = report.records.len(),
            warnings = report.warnings.len(),
            "Capture inspected"
        );
        format_capture_report(&report, format)
    }

    fn handle_check_config(&self, format: &str) -> Result<String, AmbitError> {
        let config = self.load_config()?;
        if let Err(errors) = config.validate() {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            return Err(ConfigurationError::Load(format_validation_errors(&messages)).into());
        }
        if format == "toml" {
            // Effective configuration after every layer is merged.
            return toml::to_string_pretty(&config)
                .map_err(|e| ConfigurationError::Load(e.to_string()).into());
        }
        let resources = self.resolve_policies(&config);
        format_resource_policies(&resources, format)
    }

    fn load_config(&self) -> Result<AmbitConfig, ConfigurationError> {
        match &self.config_path {
            Some(path) => ConfigLoader::load_from_file(path),
            None => ConfigLoader::load(&self.workspace_root),
        }
    }

    fn resolve_policies(&self, config: &AmbitConfig) -> Vec<ResourcePolicies> {
        let executors = config
            .executors
            .values()
            .map(|e| ("executor", e.name.clone(), e.context_service()));
        let scheduled = config
            .scheduled_executors
            .values()
            .map(|e| ("scheduled_executor", e.name.clone(), e.context_service()));
        let factories = config
            .thread_factories
            .values()
            .map(|f| ("thread_factory", f.name.clone(), f.context_service()));
        let services = config
            .context_services
            .values()
            .map(|s| ("context_service", s.name.clone(), s.clone()));

        executors
            .chain(scheduled)
            .chain(factories)
            .chain(services)
            .map(|(kind, name, service)| self.resource_policies(kind, name, &service))
            .collect()
    }

    fn resource_policies(
        &self,
        kind: &'static str,
        name: String,
        service: &ContextServiceDescriptor,
    ) -> ResourcePolicies {
        let mut setup = ContextSetup::from_descriptor(service);
        let dropped = setup.reload_providers(&self.registry);
        ResourcePolicies {
            kind,
            name,
            context_service: service.name.clone(),
            policies: setup.resolved(),
            dropped,
        }
    }
}

//! Conversion registry
//!
//! Functions are registered once and addressed by the [`FunctionHandle`]
//! issued at registration. A conversion record is created on the first
//! attempt and updated with its outcome, so "never attempted" and
//! "attempted but failed" stay distinguishable. Records are never
//! invalidated.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::diagnostics::Diagnostic;
use crate::error::RegistryError;
use crate::ir::Function;
use crate::unit::ConvertedFunction;

/// Identity of a registered function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FunctionHandle(pub u64);

impl fmt::Display for FunctionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConversionStatus {
    /// Attempt recorded, no outcome yet
    Pending,
    Converted,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversionRecord {
    pub handle: FunctionHandle,
    pub name: String,
    pub status: ConversionStatus,
    /// Number of conversions run for this function
    pub attempts: usize,
    /// Domain fallbacks decided when converting
    pub diagnostics: Vec<Diagnostic>,
    #[serde(skip)]
    pub converted: Option<Rc<ConvertedFunction>>,
}

#[derive(Debug, Default)]
pub struct ConversionRegistry {
    functions: IndexMap<FunctionHandle, Rc<Function>>,
    records: IndexMap<FunctionHandle, ConversionRecord>,
    next_handle: u64,
}

impl ConversionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, function: Function) -> FunctionHandle {
        let handle = FunctionHandle(self.next_handle);
        self.next_handle += 1;
        tracing::trace!(%handle, name = %function.name, "registered function");
        self.functions.insert(handle, Rc::new(function));
        handle
    }

    pub fn function(&self, handle: FunctionHandle) -> Result<Rc<Function>, RegistryError> {
        self.functions
            .get(&handle)
            .cloned()
            .ok_or(RegistryError::UnknownHandle(handle))
    }

    /// Mark `handle` as attempted; returns false when it already was
    pub fn record_attempt(&mut self, handle: FunctionHandle) -> Result<bool, RegistryError> {
        let name = self.function(handle)?.name.clone();
        if self.records.contains_key(&handle) {
            return Ok(false);
        }
        self.records.insert(
            handle,
            ConversionRecord {
                handle,
                name,
                status: ConversionStatus::Pending,
                attempts: 0,
                diagnostics: Vec::new(),
                converted: None,
            },
        );
        Ok(true)
    }

    fn record_mut(&mut self, handle: FunctionHandle) -> Result<&mut ConversionRecord, RegistryError> {
        self.record_attempt(handle)?;
        self.records
            .get_mut(&handle)
            .ok_or(RegistryError::UnknownHandle(handle))
    }

    pub fn record_success(
        &mut self,
        handle: FunctionHandle,
        converted: ConvertedFunction,
    ) -> Result<Rc<ConvertedFunction>, RegistryError> {
        let converted = Rc::new(converted);
        let record = self.record_mut(handle)?;
        record.attempts += 1;
        record.status = ConversionStatus::Converted;
        record.diagnostics = converted.diagnostics.clone();
        record.converted = Some(Rc::clone(&converted));
        Ok(converted)
    }

    pub fn record_failure(&mut self, handle: FunctionHandle, reason: impl Into<String>) -> Result<(), RegistryError> {
        let record = self.record_mut(handle)?;
        record.attempts += 1;
        record.status = ConversionStatus::Failed {
            reason: reason.into(),
        };
        Ok(())
    }

    pub fn record(&self, handle: FunctionHandle) -> Option<&ConversionRecord> {
        self.records.get(&handle)
    }

    /// Cached conversion, if one succeeded
    pub fn converted(&self, handle: FunctionHandle) -> Option<Rc<ConvertedFunction>> {
        self.records.get(&handle).and_then(|r| r.converted.clone())
    }

    pub fn is_converted(&self, handle: FunctionHandle) -> bool {
        self.converted(handle).is_some()
    }

    pub fn converted_source(&self, handle: FunctionHandle) -> Result<String, RegistryError> {
        let function = self.function(handle)?;
        let Some(record) = self.records.get(&handle) else {
            return Err(RegistryError::NeverAttempted {
                name: function.name.clone(),
            });
        };
        match (&record.status, &record.converted) {
            (ConversionStatus::Converted, Some(converted)) => Ok(converted.source.clone()),
            (ConversionStatus::Failed { reason }, _) => Err(RegistryError::ConversionFailed {
                name: record.name.clone(),
                reason: reason.clone(),
            }),
            _ => Err(RegistryError::NeverAttempted {
                name: record.name.clone(),
            }),
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &ConversionRecord> {
        self.records.values()
    }

    /// Conversion records as JSON, in attempt order
    pub fn records_json(&self) -> serde_json::Result<String> {
        let records: Vec<&ConversionRecord> = self.records.values().collect();
        serde_json::to_string_pretty(&records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutographConfig;
    use crate::ir::build::*;
    use crate::transform::convert_function;

    fn simple() -> Function {
        Function::new("f", vec![], vec![ret(int(1))])
    }

    #[test]
    fn test_never_attempted_and_failed_are_distinct() {
        let mut registry = ConversionRegistry::new();
        let h = registry.register(simple());
        assert_eq!(
            registry.converted_source(h),
            Err(RegistryError::NeverAttempted {
                name: "f".to_string()
            })
        );
        registry.record_failure(h, "boom").unwrap();
        assert_eq!(
            registry.converted_source(h),
            Err(RegistryError::ConversionFailed {
                name: "f".to_string(),
                reason: "boom".to_string()
            })
        );
        assert!(!registry.is_converted(h));
    }

    #[test]
    fn test_record_attempt_is_idempotent() {
        let mut registry = ConversionRegistry::new();
        let h = registry.register(simple());
        assert!(registry.record_attempt(h).unwrap());
        assert!(!registry.record_attempt(h).unwrap());
        assert_eq!(registry.records().count(), 1);
    }

    #[test]
    fn test_success_caches_source() {
        let mut registry = ConversionRegistry::new();
        let f = simple();
        let h = registry.register(f.clone());
        let converted = convert_function(&f, &AutographConfig::default()).unwrap();
        registry.record_success(h, converted).unwrap();
        assert!(registry.is_converted(h));
        assert_eq!(registry.converted_source(h).unwrap(), "def f():\n    return 1\n");
        let json = registry.records_json().unwrap();
        assert!(json.contains("\"status\": \"converted\""));
    }

    #[test]
    fn test_unknown_handle() {
        let registry = ConversionRegistry::new();
        assert_eq!(
            registry.converted_source(FunctionHandle(7)),
            Err(RegistryError::UnknownHandle(FunctionHandle(7)))
        );
        assert_eq!(FunctionHandle(7).to_string(), "fn#7");
    }
}

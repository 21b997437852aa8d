use tracing::info;

use super::Advisor;
use crate::errors::RegistryError;

/// Ordered set of advisors keyed by unique name
///
/// Registration order is the order advisors run in and the order their
/// signals appear in a decision. Every mutation either fully applies or
/// leaves the registry untouched.
#[derive(Debug, Clone, Default)]
pub struct AdvisorRegistry {
    advisors: Vec<Advisor>,
}

impl AdvisorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, advisor: Advisor) -> Result<(), RegistryError> {
        advisor.validate()?;
        if self.contains(&advisor.name) {
            return Err(RegistryError::DuplicateAdvisor(advisor.name));
        }
        info!("Registered advisor '{}'", advisor.name);
        self.advisors.push(advisor);
        Ok(())
    }

    /// Register a batch; one bad or duplicate entry rejects the whole batch
    pub fn register_all(&mut self, advisors: Vec<Advisor>) -> Result<(), RegistryError> {
        for (i, advisor) in advisors.iter().enumerate() {
            advisor.validate()?;
            if self.contains(&advisor.name) || advisors[..i].iter().any(|a| a.name == advisor.name) {
                return Err(RegistryError::DuplicateAdvisor(advisor.name.clone()));
            }
        }
        for advisor in advisors {
            info!("Registered advisor '{}'", advisor.name);
            self.advisors.push(advisor);
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Advisor, RegistryError> {
        let index = self
            .position(name)
            .ok_or_else(|| RegistryError::AdvisorNotFound(name.to_string()))?;
        info!("Removed advisor '{}'", name);
        Ok(self.advisors.remove(index))
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        let index = self
            .position(name)
            .ok_or_else(|| RegistryError::AdvisorNotFound(name.to_string()))?;
        self.advisors[index].enabled = enabled;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Advisor> {
        self.advisors.iter().find(|a| a.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Enabled advisors in registration order
    pub fn enabled(&self) -> impl Iterator<Item = &Advisor> {
        self.advisors.iter().filter(|a| a.enabled)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Advisor> {
        self.advisors.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.advisors.iter().map(|a| a.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.advisors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.advisors.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.advisors.iter().position(|a| a.name == name)
    }
}

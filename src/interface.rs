//! Runtime descriptions of remote interfaces.
//!
//! Descriptors are produced by [`remote_interface!`](crate::remote_interface) and validated
//! before any stub or skeleton is built from them.

use crate::{
    error::{Error, ErrorKind, TransportError},
    types::Type,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};

/// Identifies one overload: a selector plus its ordered parameter types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodKey {
    pub selector: String,
    pub param_types: Vec<Type>,
}

impl MethodKey {
    pub fn new(selector: impl Into<String>, param_types: Vec<Type>) -> Self {
        Self {
            selector: selector.into(),
            param_types,
        }
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}(", self.selector)?;
        for (i, typ) in self.param_types.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{typ}")?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub key: MethodKey,
    pub return_type: Type,
    /// Error kinds the method declares.
    pub errors: Vec<String>,
}

impl MethodDescriptor {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            key: MethodKey::new(selector, Vec::new()),
            return_type: Type::Unit,
            errors: Vec::new(),
        }
    }

    pub fn param(mut self, typ: Type) -> Self {
        self.key.param_types.push(typ);
        self
    }

    pub fn returns(mut self, typ: Type) -> Self {
        self.return_type = typ;
        self
    }

    pub fn throws(mut self, kind: impl Into<String>) -> Self {
        self.errors.push(kind.into());
        self
    }

    pub fn selector(&self) -> &str {
        &self.key.selector
    }

    pub fn param_types(&self) -> &[Type] {
        &self.key.param_types
    }

    pub fn declares(&self, kind: &str) -> bool {
        self.errors.iter().any(|k| k == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterfaceDescriptor {
    name: String,
    methods: Vec<MethodDescriptor>,
}

impl InterfaceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn find(&self, selector: &str, param_types: &[Type]) -> Option<&MethodDescriptor> {
        self.methods
            .iter()
            .find(|m| m.key.selector == selector && m.key.param_types == param_types)
    }

    /// Checks that the descriptor names a usable remote interface.
    ///
    /// # Errors
    /// [`Error::InterfaceShape`] when the name or a selector is empty, when two methods share
    /// a [`MethodKey`], or when a method does not declare [`TransportError::KIND`].
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::InterfaceShape("interface has no name".into()));
        }
        let mut seen = BTreeSet::new();
        for method in &self.methods {
            if method.key.selector.is_empty() {
                return Err(Error::InterfaceShape(format!(
                    "{} has a method without a selector",
                    self.name
                )));
            }
            if !seen.insert(&method.key) {
                return Err(Error::InterfaceShape(format!(
                    "{} declares {} more than once",
                    self.name, method.key
                )));
            }
            if !method.declares(TransportError::KIND) {
                return Err(Error::InterfaceShape(format!(
                    "{}::{} does not declare {}",
                    self.name,
                    method.key,
                    TransportError::KIND
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for InterfaceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)
    }
}

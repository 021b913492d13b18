//! Service namespaces and servicer identity resolution.
//!
//! A [`ServiceModule`] stands in for a generated service module: a bag of
//! named members, of which the fixture factory cares about the servicer
//! definition and the `add_<Servicer>_to_server` attach function.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use mockgrpc_core::FixtureError;

use crate::mock::MockServicer;
use crate::server::GrpcMockServer;

/// Member name suffix that marks the servicer of a service module.
pub const SERVICER_SUFFIX: &str = "Servicer";

/// Registers a mock servicer as the live implementation on the mock server.
pub type AttachFn =
    Arc<dyn Fn(MockServicer, &GrpcMockServer) -> Result<(), FixtureError> + Send + Sync>;

/// Name of the attach function for `servicer`.
pub fn attach_fn_name(servicer: &str) -> String {
    format!("add_{servicer}_to_server")
}

/// The capability a mock has to fulfill: a servicer name and its RPC methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicerDef {
    pub name: String,
    pub methods: Vec<String>,
}

impl ServicerDef {
    pub fn new(name: impl Into<String>, methods: &[&str]) -> Self {
        Self {
            name: name.into(),
            methods: methods.iter().map(|m| (*m).to_owned()).collect(),
        }
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }
}

#[derive(Clone)]
enum Member {
    Servicer(ServicerDef),
    Attach(AttachFn),
    Symbol,
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Servicer(def) => f.debug_tuple("Servicer").field(def).finish(),
            Self::Attach(_) => f.write_str("Attach"),
            Self::Symbol => f.write_str("Symbol"),
        }
    }
}

/// Named members of one generated service definition.
#[derive(Debug, Clone)]
pub struct ServiceModule {
    name: String,
    members: BTreeMap<String, Member>,
}

impl ServiceModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_servicer(mut self, name: impl Into<String>, methods: &[&str]) -> Self {
        let name = name.into();
        let def = ServicerDef::new(name.clone(), methods);
        self.members.insert(name, Member::Servicer(def));
        self
    }

    pub fn with_attach<F>(mut self, name: impl Into<String>, attach: F) -> Self
    where
        F: Fn(MockServicer, &GrpcMockServer) -> Result<(), FixtureError> + Send + Sync + 'static,
    {
        self.members
            .insert(name.into(), Member::Attach(Arc::new(attach)));
        self
    }

    /// Any other member (message types, client stubs); only its name matters.
    pub fn with_symbol(mut self, name: impl Into<String>) -> Self {
        self.members.insert(name.into(), Member::Symbol);
        self
    }

    /// Servicer plus its attach function under the conventional name.
    pub fn with_service<F>(self, servicer: &str, methods: &[&str], attach: F) -> Self
    where
        F: Fn(MockServicer, &GrpcMockServer) -> Result<(), FixtureError> + Send + Sync + 'static,
    {
        self.with_servicer(servicer, methods)
            .with_attach(attach_fn_name(servicer), attach)
    }

    /// Member names in sorted order.
    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    pub fn servicer(&self, name: &str) -> Result<&ServicerDef, FixtureError> {
        match self.members.get(name) {
            Some(Member::Servicer(def)) => Ok(def),
            Some(_) => Err(FixtureError::NotAServicer {
                module: self.name.clone(),
                name: name.to_owned(),
            }),
            None => Err(FixtureError::MissingMember {
                module: self.name.clone(),
                name: name.to_owned(),
            }),
        }
    }

    pub fn attach_fn(&self, servicer: &str) -> Result<&AttachFn, FixtureError> {
        let name = attach_fn_name(servicer);
        match self.members.get(&name) {
            Some(Member::Attach(attach)) => Ok(attach),
            _ => Err(FixtureError::MissingAttach {
                module: self.name.clone(),
                name,
            }),
        }
    }
}

/// Pick the only member whose name ends with [`SERVICER_SUFFIX`].
pub fn guess_servicer(module: &ServiceModule) -> Result<String, FixtureError> {
    let mut candidates: Vec<String> = module
        .member_names()
        .filter(|name| name.ends_with(SERVICER_SUFFIX))
        .map(str::to_owned)
        .collect();
    if candidates.len() != 1 {
        return Err(FixtureError::AmbiguousServicer { candidates });
    }
    Ok(candidates.remove(0))
}

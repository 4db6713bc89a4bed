//! Prepared statement and portal caches
//!
//! Two name-indexed maps per session, driving the extended query protocol.
//! The empty name is the single-slot unnamed statement/portal that every
//! new Parse/Bind overwrites; named objects persist until Close or session
//! end.

use crate::error::{AdapterError, Result};
use crate::executor::ResultStream;
use crate::protocol::message::FieldDescription;
use crate::translate::Translation;
use crate::types::oid;
use crate::types::PgValue;
use std::collections::HashMap;
use std::sync::Arc;

/// A parsed statement held in the session cache.
#[derive(Debug)]
pub struct PreparedStatement {
    /// Statement name (empty = unnamed)
    pub name: String,
    /// SQL as received from the client
    pub original_sql: String,
    /// Translation result (shared with the process-wide cache)
    pub translation: Arc<Translation>,
    /// Parameter type OIDs declared in Parse (0 = unspecified)
    pub param_types: Vec<i32>,
}

impl PreparedStatement {
    /// Parameter OIDs for ParameterDescription. Unspecified types report
    /// UNKNOWN (705), not 0: drivers chase OID 0 into catalog recursion.
    /// asyncpg-family drivers will then require explicit `$1::type` casts,
    /// which is what a real server makes them do too.
    pub fn describe_param_oids(&self) -> Vec<i32> {
        let declared = self.param_types.len();
        let total = self.translation.param_count.max(declared);
        (0..total)
            .map(|i| match self.param_types.get(i) {
                Some(&oid) if oid != 0 => oid,
                _ => oid::UNKNOWN,
            })
            .collect()
    }
}

/// An executable portal: a statement plus bound parameters and, once
/// execution has started, the live row cursor for PortalSuspended resumes.
pub struct Portal {
    /// Portal name (empty = unnamed)
    pub name: String,
    /// Name of the statement this portal was bound from
    pub statement: String,
    /// Decoded parameter values
    pub params: Vec<PgValue>,
    /// Result format codes as sent in Bind (may be empty, one, or per-column)
    pub result_formats: Vec<i16>,
    /// Row description, fixed at first execution
    pub columns: Option<Vec<FieldDescription>>,
    /// Suspended cursor between Execute calls
    pub stream: Option<Box<dyn ResultStream>>,
    /// Rows already emitted through this portal
    pub rows_emitted: u64,
}

impl Portal {
    /// Format code for result column `index`, per the Bind rules.
    pub fn format_for_column(&self, index: usize) -> i16 {
        match self.result_formats.len() {
            0 => 0,
            1 => self.result_formats[0],
            _ => self.result_formats.get(index).copied().unwrap_or(0),
        }
    }
}

fn missing_portal(name: &str) -> AdapterError {
    AdapterError::Backend {
        sqlstate: Some("34000"),
        message: format!("portal \"{}\" does not exist", name),
    }
}

/// Per-session statement and portal maps.
#[derive(Default)]
pub struct SessionCaches {
    statements: HashMap<String, Arc<PreparedStatement>>,
    portals: HashMap<String, Portal>,
}

impl SessionCaches {
    /// Fresh, empty caches.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a Parse result. The unnamed statement is always overwritten;
    /// re-parsing an existing named statement is an error until it is
    /// closed.
    pub fn store_statement(&mut self, statement: PreparedStatement) -> Result<()> {
        let name = statement.name.clone();
        if !name.is_empty() && self.statements.contains_key(&name) {
            return Err(AdapterError::DuplicateStatement(name));
        }
        if name.is_empty() {
            // a new unnamed statement invalidates the unnamed portal
            self.portals.remove("");
        }
        self.statements.insert(name, Arc::new(statement));
        Ok(())
    }

    /// Look up a statement for Bind/Describe. Referencing a closed or
    /// never-parsed statement is a protocol violation and fatal to the
    /// connection.
    pub fn statement(&self, name: &str) -> Result<Arc<PreparedStatement>> {
        self.statements.get(name).cloned().ok_or_else(|| {
            AdapterError::Protocol(format!("prepared statement \"{}\" does not exist", name))
        })
    }

    /// Whether a statement exists (Close is lenient about missing names).
    pub fn has_statement(&self, name: &str) -> bool {
        self.statements.contains_key(name)
    }

    /// Close a statement and invalidate every portal bound from it.
    pub fn close_statement(&mut self, name: &str) {
        self.statements.remove(name);
        self.portals.retain(|_, portal| portal.statement != name);
    }

    /// Store a Bind result. The unnamed portal is always overwritten; a
    /// named portal must not already exist.
    pub fn store_portal(&mut self, portal: Portal) -> Result<()> {
        let name = portal.name.clone();
        if !name.is_empty() && self.portals.contains_key(&name) {
            return Err(AdapterError::Backend {
                sqlstate: Some("42P03"),
                message: format!("cursor \"{}\" already exists", name),
            });
        }
        self.portals.insert(name, portal);
        Ok(())
    }

    /// Mutable access for Execute.
    pub fn portal_mut(&mut self, name: &str) -> Result<&mut Portal> {
        self.portals
            .get_mut(name)
            .ok_or_else(|| missing_portal(name))
    }

    /// Shared access for Describe.
    pub fn portal(&self, name: &str) -> Result<&Portal> {
        self.portals.get(name).ok_or_else(|| missing_portal(name))
    }

    /// Take a portal out of the cache for execution. Execution needs the
    /// portal and the session mutably at once; the portal goes back in via
    /// [`SessionCaches::restore_portal`] when the Execute finishes.
    pub fn take_portal(&mut self, name: &str) -> Result<Portal> {
        self.portals.remove(name).ok_or_else(|| missing_portal(name))
    }

    /// Put an executing portal back.
    pub fn restore_portal(&mut self, portal: Portal) {
        self.portals.insert(portal.name.clone(), portal);
    }

    /// Close a portal.
    pub fn close_portal(&mut self, name: &str) {
        self.portals.remove(name);
    }

    /// Drop all portals (transaction boundary).
    pub fn clear_portals(&mut self) {
        self.portals.clear();
    }

    /// Number of cached statements.
    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }
}

//! Migration plans and run reports.

use serde::Serialize;

use crate::dialect::{FOREIGN_KEYS_OFF, FOREIGN_KEYS_ON, FOREIGN_KEY_CHECK};
use crate::rebuild::RebuildPlan;

/// Kind of a whole-table or whole-index change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Drop a table absent from the desired schema.
    DropTable,
    /// Drop an index absent from (or redefined in) the desired schema.
    DropIndex,
    /// Create a table absent from the current schema.
    CreateTable,
    /// Create an index absent from (or redefined in) the current schema.
    CreateIndex,
}

/// A change applied during the structural phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuralChange {
    /// What is changed.
    pub kind: ChangeKind,
    /// Table or index name.
    pub name: String,
    /// Statement that applies the change.
    pub sql: String,
}

/// Everything a run would do, computed without touching the database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    /// Structural changes, drops before creates.
    pub structural: Vec<StructuralChange>,
    /// Table rebuilds, in execution order.
    pub rebuilds: Vec<RebuildPlan>,
}

impl MigrationPlan {
    /// Returns true when the database already matches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.structural.is_empty() && self.rebuilds.is_empty()
    }

    /// All statements of the plan in execution order, including the foreign
    /// key pragmas around the rebuilds.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        let mut sql: Vec<String> = self.structural.iter().map(|c| c.sql.clone()).collect();

        if !self.rebuilds.is_empty() {
            sql.push(FOREIGN_KEYS_OFF.to_string());
            for rebuild in &self.rebuilds {
                sql.push("BEGIN".to_string());
                sql.extend(rebuild.statements().map(str::to_string));
                sql.push(FOREIGN_KEY_CHECK.to_string());
                sql.push("COMMIT".to_string());
            }
            sql.push(FOREIGN_KEYS_ON.to_string());
        }

        sql
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Whether statements were only printed.
    pub dry_run: bool,
    /// Tables dropped.
    pub tables_dropped: Vec<String>,
    /// Indices dropped.
    pub indices_dropped: Vec<String>,
    /// Tables created.
    pub tables_created: Vec<String>,
    /// Indices created during the structural phase.
    pub indices_created: Vec<String>,
    /// Tables rebuilt, in order.
    pub tables_rebuilt: Vec<String>,
    /// Number of statements sent to (or printed for) the database.
    pub statements: usize,
}

impl MigrationReport {
    pub(crate) fn record(&mut self, change: &StructuralChange) {
        let names = match change.kind {
            ChangeKind::DropTable => &mut self.tables_dropped,
            ChangeKind::DropIndex => &mut self.indices_dropped,
            ChangeKind::CreateTable => &mut self.tables_created,
            ChangeKind::CreateIndex => &mut self.indices_created,
        };
        names.push(change.name.clone());
    }

    /// Returns true when nothing was changed.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.statements == 0
    }
}

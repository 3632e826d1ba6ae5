//! Migration engine.
//!
//! Brings a target database in line with a desired schema definition:
//!
//! 1. introspect the desired (in-memory) and current databases
//! 2. drop obsolete tables and indices, create missing ones
//! 3. introspect again and rebuild every table whose column set changed
//!
//! Structural statements are auto-committed one by one; a failure later in
//! the run does not undo them. Each rebuild has its own transaction.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::ConnectOptions;
use tracing::{debug, info, warn};

use crate::dialect::{SqliteDialect, FOREIGN_KEYS_OFF, FOREIGN_KEYS_ON};
use crate::diff::diff;
use crate::error::{MigrateError, Result};
use crate::introspect::introspect;
use crate::plan::{ChangeKind, MigrationPlan, MigrationReport, StructuralChange};
use crate::rebuild::{rebuild_table, RebuildPlan};
use crate::schema::SchemaModel;

/// DSN of the throwaway database the desired schema is replayed into.
pub const DESIRED_DSN: &str = "sqlite::memory:";

/// Options for the migration engine.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Print statements instead of executing them.
    pub dry_run: bool,
    /// Appended to a table name to name its rebuild shadow.
    pub shadow_suffix: String,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            shadow_suffix: "_new".to_string(),
        }
    }
}

impl MigrationOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables dry-run mode (SQL is printed but not executed).
    #[must_use]
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Sets the shadow table suffix.
    #[must_use]
    pub fn shadow_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.shadow_suffix = suffix.into();
        self
    }
}

/// Opens a connection to `dsn`, creating the database file if needed.
pub async fn connect(dsn: &str) -> Result<SqliteConnection> {
    let err = |source: sqlx::Error| MigrateError::Connection {
        dsn: dsn.to_string(),
        source,
    };

    SqliteConnectOptions::from_str(dsn)
        .map_err(err)?
        .create_if_missing(true)
        .connect()
        .await
        .map_err(err)
}

/// Replays a schema definition into a fresh in-memory database.
///
/// The returned connection owns that database; dropping it discards the
/// desired schema.
pub async fn desired_from_definition(definition: &str) -> Result<SqliteConnection> {
    let mut conn = connect(DESIRED_DSN).await?;
    sqlx::raw_sql(definition)
        .execute(&mut conn)
        .await
        .map_err(|e| MigrateError::execution("<schema definition>", e))?;
    Ok(conn)
}

/// Tables present in both models whose column names differ.
///
/// Names are compared exactly, so a column renamed only in case marks its
/// table as altered. The rebuild matches such columns ignoring case and keeps
/// their data.
#[must_use]
pub fn find_altered_tables(desired: &SchemaModel, current: &SchemaModel) -> BTreeSet<String> {
    current
        .tables
        .iter()
        .filter_map(|(name, table)| {
            let target = desired.get_table(name)?;
            let columns = diff(&target.columns, &table.columns);
            if columns.is_empty() {
                return None;
            }
            debug!(
                table = %name,
                added = columns.to_add.len(),
                removed = columns.to_remove.len(),
                "Column set changed"
            );
            Some(name.clone())
        })
        .collect()
}

/// Orders altered tables so referenced tables come before the tables that
/// reference them. Ties, and cycles, fall back to name order.
///
/// Foreign keys may spell the parent in any case; it is matched against the
/// altered names ignoring ASCII case.
#[must_use]
pub fn rebuild_order(altered: &BTreeSet<String>, desired: &SchemaModel) -> Vec<String> {
    let mut pending: BTreeMap<&str, BTreeSet<&str>> = altered
        .iter()
        .map(|name| {
            let parents: BTreeSet<&str> = desired
                .get_table(name)
                .map(|t| {
                    t.references
                        .iter()
                        .filter_map(|p| altered.iter().find(|a| a.eq_ignore_ascii_case(p)))
                        .map(String::as_str)
                        .filter(|p| *p != name.as_str())
                        .collect()
                })
                .unwrap_or_default();
            (name.as_str(), parents)
        })
        .collect();

    let mut order = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let mut ready: Vec<&str> = pending
            .iter()
            .filter(|(_, parents)| parents.is_empty())
            .map(|(name, _)| *name)
            .collect();

        if ready.is_empty() {
            match pending.keys().next() {
                Some(first) => {
                    warn!(table = %first, "Foreign key cycle between altered tables");
                    ready.push(*first);
                }
                None => break,
            }
        }

        for name in ready {
            pending.remove(name);
            for parents in pending.values_mut() {
                parents.remove(name);
            }
            order.push(name.to_string());
        }
    }

    order
}

/// Structural changes turning `current` into `desired`, drops first.
///
/// Index creations on tables listed in `deferred` are left out: those tables
/// get their full desired index set when they are rebuilt.
#[must_use]
pub fn structural_changes(
    dialect: &SqliteDialect,
    desired: &SchemaModel,
    current: &SchemaModel,
    deferred: &BTreeSet<String>,
) -> Vec<StructuralChange> {
    let tables = diff(&desired.tables, &current.tables);
    let indices = diff(&desired.indices, &current.indices);

    let redefined: BTreeSet<&str> = desired
        .indices
        .iter()
        .filter(|(name, index)| {
            current
                .indices
                .get(name.as_str())
                .is_some_and(|existing| existing.sql != index.sql)
        })
        .map(|(name, _)| name.as_str())
        .collect();

    let mut changes = Vec::new();

    for name in tables.to_remove.keys() {
        changes.push(StructuralChange {
            kind: ChangeKind::DropTable,
            name: (*name).to_string(),
            sql: dialect.drop_table_sql(name),
        });
    }

    // Indices of dropped tables went with them.
    let dropped_indices: BTreeSet<&str> = indices
        .to_remove
        .iter()
        .filter(|(_, index)| !tables.to_remove.contains_key(index.table.as_str()))
        .map(|(name, _)| *name)
        .chain(redefined.iter().copied())
        .collect();
    for name in dropped_indices {
        changes.push(StructuralChange {
            kind: ChangeKind::DropIndex,
            name: name.to_string(),
            sql: dialect.drop_index_sql(name),
        });
    }

    for (name, table) in &tables.to_add {
        changes.push(StructuralChange {
            kind: ChangeKind::CreateTable,
            name: (*name).to_string(),
            sql: table.sql.clone(),
        });
    }

    let created_indices: BTreeSet<&str> = indices
        .to_add
        .keys()
        .copied()
        .chain(redefined.iter().copied())
        .chain(
            desired
                .indices
                .values()
                .filter(|i| tables.to_add.contains_key(i.table.as_str()))
                .map(|i| i.name.as_str()),
        )
        .collect();
    for name in created_indices {
        let index = &desired.indices[name];
        if deferred.contains(&index.table) {
            continue;
        }
        changes.push(StructuralChange {
            kind: ChangeKind::CreateIndex,
            name: name.to_string(),
            sql: index.sql.clone(),
        });
    }

    changes
}

/// Drives a reconciliation run.
#[derive(Debug, Default)]
pub struct MigrationEngine {
    dialect: SqliteDialect,
    options: MigrationOptions,
}

impl MigrationEngine {
    /// Creates an engine with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine with custom options.
    #[must_use]
    pub fn with_options(options: MigrationOptions) -> Self {
        Self {
            dialect: SqliteDialect::new(),
            options,
        }
    }

    /// Computes the full plan for turning `current` into `desired` without
    /// touching any database.
    pub fn plan(&self, desired: &SchemaModel, current: &SchemaModel) -> Result<MigrationPlan> {
        let altered = find_altered_tables(desired, current);
        let structural = structural_changes(&self.dialect, desired, current, &altered);
        let rebuilds = self.rebuild_plans(&altered, desired, current)?;
        Ok(MigrationPlan {
            structural,
            rebuilds,
        })
    }

    /// Connects to `dsn`, replays `definition` in memory and migrates.
    pub async fn migrate(&self, dsn: &str, definition: &str) -> Result<MigrationReport> {
        let mut desired_db = desired_from_definition(definition).await?;
        let mut target = connect(dsn).await?;
        self.run(&mut target, &mut desired_db).await
    }

    /// Migrates `target` to the schema held by `desired_db`.
    pub async fn run(
        &self,
        target: &mut SqliteConnection,
        desired_db: &mut SqliteConnection,
    ) -> Result<MigrationReport> {
        let mut report = MigrationReport {
            dry_run: self.options.dry_run,
            ..MigrationReport::default()
        };

        let desired = introspect(desired_db).await?;
        let current = introspect(target).await?;

        info!("Applying structural changes");
        let altered = find_altered_tables(&desired, &current);
        for change in structural_changes(&self.dialect, &desired, &current, &altered) {
            info!(kind = ?change.kind, name = %change.name, "Applying change");
            self.execute(target, &change.sql, &mut report).await?;
            report.record(&change);
        }

        let desired = introspect(desired_db).await?;
        let current = introspect(target).await?;
        let altered = find_altered_tables(&desired, &current);
        if altered.is_empty() {
            info!(statements = report.statements, "Schema is up to date");
            return Ok(report);
        }

        let rebuilds = self.rebuild_plans(&altered, &desired, &current)?;
        info!(tables = rebuilds.len(), "Rebuilding altered tables");

        self.execute(target, FOREIGN_KEYS_OFF, &mut report).await?;
        if let Err(err) = self.rebuild_all(target, &rebuilds, &mut report).await {
            if let Err(restore) = self.execute(target, FOREIGN_KEYS_ON, &mut report).await {
                warn!(error = %restore, "Foreign key enforcement left disabled");
            }
            return Err(err);
        }
        self.execute(target, FOREIGN_KEYS_ON, &mut report).await?;

        info!(statements = report.statements, "Migration complete");
        Ok(report)
    }

    fn rebuild_plans(
        &self,
        altered: &BTreeSet<String>,
        desired: &SchemaModel,
        current: &SchemaModel,
    ) -> Result<Vec<RebuildPlan>> {
        rebuild_order(altered, desired)
            .iter()
            .map(|table| {
                RebuildPlan::new(
                    &self.dialect,
                    table,
                    desired,
                    current,
                    &self.options.shadow_suffix,
                )
            })
            .collect()
    }

    async fn rebuild_all(
        &self,
        target: &mut SqliteConnection,
        rebuilds: &[RebuildPlan],
        report: &mut MigrationReport,
    ) -> Result<()> {
        for plan in rebuilds {
            if self.options.dry_run {
                for sql in plan.statements() {
                    println!("{};", sql);
                    report.statements += 1;
                }
            } else {
                rebuild_table(target, plan).await?;
                report.statements += plan.steps.len();
            }
            report.tables_rebuilt.push(plan.table.clone());
        }
        Ok(())
    }

    async fn execute(
        &self,
        conn: &mut SqliteConnection,
        sql: &str,
        report: &mut MigrationReport,
    ) -> Result<()> {
        debug!(sql = %sql, "Executing SQL");
        report.statements += 1;

        if self.options.dry_run {
            println!("{};", sql);
            return Ok(());
        }

        sqlx::raw_sql(sql)
            .execute(&mut *conn)
            .await
            .map_err(|e| MigrateError::execution(sql, e))?;
        Ok(())
    }
}

//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! shared by every request; the `gate` keeps reads from observing a
//! transaction that another task has open on that connection.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, TransactionBehavior, params};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::grouping::model::{Group, GroupTurn};
use crate::onboarding::model::{
    ConversationTurn, Participant, ParticipantProfile, TurnPhase, TurnRole,
};
use crate::onboarding::state::ConversationState;
use crate::session::WorkshopSession;
use crate::store::migrations;
use crate::store::traits::{Database, ExportSnapshot, UpsertOutcome};

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    gate: RwLock<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::Pool(format!("Failed to create database directory: {e}"))
                })?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            gate: RwLock::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Start an immediate transaction. Dropping it uncommitted rolls back.
    async fn begin(&self, op: &str) -> Result<libsql::Transaction, DatabaseError> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: begin: {e}")))
    }

    /// Commit on success, roll back on failure.
    async fn finish<T>(
        tx: libsql::Transaction,
        op: &str,
        result: Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        match result {
            Ok(value) => {
                tx.commit()
                    .await
                    .map_err(|e| DatabaseError::Query(format!("{op}: commit: {e}")))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(op, error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn load_members(&self, group: &mut Group) -> Result<(), DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT participant_id FROM group_members WHERE group_id = ?1 ORDER BY position ASC",
                params![group.id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_members: {e}")))?;

        let mut members = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("load_members: {e}")))?
        {
            members.push(
                row.get::<String>(0)
                    .map_err(|e| DatabaseError::Query(format!("load_members: {e}")))?,
            );
        }
        group.members = members;
        Ok(())
    }

    async fn query_groups(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Group>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut groups = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            groups.push(row_to_group(&row)?);
        }
        for group in &mut groups {
            self.load_members(group).await?;
        }
        Ok(groups)
    }

    async fn query_participants(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Participant>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut participants = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            participants.push(row_to_participant(&row, 0)?);
        }
        Ok(participants)
    }

    async fn query_turns(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<ConversationTurn>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut turns = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            turns.push(row_to_turn(&row)?);
        }
        Ok(turns)
    }

    async fn query_group_turns(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<GroupTurn>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut turns = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            turns.push(row_to_group_turn(&row)?);
        }
        Ok(turns)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn get_text(row: &libsql::Row, idx: i32, op: &str) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::Query(format!("{op}: column {idx}: {e}")))
}

fn parse_column<T>(raw: &str, what: &str) -> Result<T, DatabaseError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| DatabaseError::Serialization(format!("{what}: {e}")))
}

const PARTICIPANT_COLUMNS: &str =
    "external_id, session_id, name, creative_role, state, turn, created_at, updated_at";

const TURN_COLUMNS: &str = "id, participant_id, session_id, role, content, phase, created_at";

const PROFILE_COLUMNS: &str = "participant_id, skill_level, goals, barriers, summary, created_at";

const GROUP_COLUMNS: &str = "id, session_id, number, name, rationale, created_at, superseded_at";

const GROUP_TURN_COLUMNS: &str = "id, group_id, role, content, created_at";

/// Map a row to a Participant, reading PARTICIPANT_COLUMNS starting at `base`.
fn row_to_participant(row: &libsql::Row, base: i32) -> Result<Participant, DatabaseError> {
    let op = "row_to_participant";
    let turn: i64 = row
        .get(base + 5)
        .map_err(|e| DatabaseError::Query(format!("{op}: turn: {e}")))?;
    Ok(Participant {
        external_id: get_text(row, base, op)?,
        session_id: get_text(row, base + 1, op)?,
        name: row.get::<String>(base + 2).ok(),
        creative_role: row.get::<String>(base + 3).ok(),
        state: parse_column::<ConversationState>(&get_text(row, base + 4, op)?, "state")?,
        turn: u32::try_from(turn)
            .map_err(|e| DatabaseError::Serialization(format!("turn: {e}")))?,
        created_at: parse_datetime(&get_text(row, base + 6, op)?),
        updated_at: parse_datetime(&get_text(row, base + 7, op)?),
    })
}

fn row_to_turn(row: &libsql::Row) -> Result<ConversationTurn, DatabaseError> {
    let op = "row_to_turn";
    Ok(ConversationTurn {
        id: parse_column::<Uuid>(&get_text(row, 0, op)?, "turn id")?,
        participant_id: get_text(row, 1, op)?,
        session_id: get_text(row, 2, op)?,
        role: parse_column::<TurnRole>(&get_text(row, 3, op)?, "role")?,
        content: get_text(row, 4, op)?,
        phase: parse_column::<TurnPhase>(&get_text(row, 5, op)?, "phase")?,
        created_at: parse_datetime(&get_text(row, 6, op)?),
    })
}

/// Map a row to a profile, reading PROFILE_COLUMNS starting at `base`.
fn row_to_profile(row: &libsql::Row, base: i32) -> Result<ParticipantProfile, DatabaseError> {
    let op = "row_to_profile";
    Ok(ParticipantProfile {
        participant_id: get_text(row, base, op)?,
        skill_level: parse_column(&get_text(row, base + 1, op)?, "skill_level")?,
        goals: get_text(row, base + 2, op)?,
        barriers: get_text(row, base + 3, op)?,
        summary: get_text(row, base + 4, op)?,
        created_at: parse_datetime(&get_text(row, base + 5, op)?),
    })
}

/// Group header only; members are loaded separately.
fn row_to_group(row: &libsql::Row) -> Result<Group, DatabaseError> {
    let op = "row_to_group";
    let number: i64 = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("{op}: number: {e}")))?;
    Ok(Group {
        id: parse_column::<Uuid>(&get_text(row, 0, op)?, "group id")?,
        session_id: get_text(row, 1, op)?,
        number: u32::try_from(number)
            .map_err(|e| DatabaseError::Serialization(format!("group number: {e}")))?,
        name: get_text(row, 3, op)?,
        rationale: get_text(row, 4, op)?,
        members: Vec::new(),
        created_at: parse_datetime(&get_text(row, 5, op)?),
        superseded_at: row.get::<String>(6).ok().map(|s| parse_datetime(&s)),
    })
}

fn row_to_group_turn(row: &libsql::Row) -> Result<GroupTurn, DatabaseError> {
    let op = "row_to_group_turn";
    Ok(GroupTurn {
        id: parse_column::<Uuid>(&get_text(row, 0, op)?, "group turn id")?,
        group_id: parse_column::<Uuid>(&get_text(row, 1, op)?, "group id")?,
        role: parse_column::<TurnRole>(&get_text(row, 2, op)?, "role")?,
        content: get_text(row, 3, op)?,
        created_at: parse_datetime(&get_text(row, 4, op)?),
    })
}

// ── Statement helpers (usable inside or outside a transaction) ──────

async fn insert_turn_on(conn: &Connection, turn: &ConversationTurn) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO conversation_turns (id, participant_id, session_id, role, content, phase, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            turn.id.to_string(),
            turn.participant_id.as_str(),
            turn.session_id.as_str(),
            turn.role.as_str(),
            turn.content.as_str(),
            turn.phase.as_str(),
            turn.created_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("insert_turn: {e}")))?;
    Ok(())
}

async fn update_participant_on(
    conn: &Connection,
    participant: &Participant,
) -> Result<(), DatabaseError> {
    // Only overwrite a stored state the new one may follow, so a stale copy
    // cannot undo a transition committed elsewhere.
    let predecessors = ConversationState::ALL
        .iter()
        .filter(|stored| stored.may_advance_to(participant.state))
        .map(|stored| format!("'{}'", stored.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    let changed = conn
        .execute(
            &format!(
                "UPDATE participants
                 SET name = ?2, creative_role = ?3, state = ?4, turn = ?5, updated_at = ?6
                 WHERE external_id = ?1 AND state IN ({predecessors})"
            ),
            params![
                participant.external_id.as_str(),
                opt_text(participant.name.as_deref()),
                opt_text(participant.creative_role.as_deref()),
                participant.state.as_str(),
                i64::from(participant.turn),
                Utc::now().to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("update_participant: {e}")))?;
    if changed > 0 {
        return Ok(());
    }

    let mut rows = conn
        .query(
            "SELECT state FROM participants WHERE external_id = ?1",
            params![participant.external_id.as_str()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("update_participant: {e}")))?;
    match rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("update_participant: {e}")))?
    {
        Some(row) => Err(DatabaseError::StaleState {
            id: participant.external_id.clone(),
            stored: get_text(&row, 0, "update_participant")?,
            attempted: participant.state.as_str().to_string(),
        }),
        None => Err(DatabaseError::NotFound {
            entity: "participant".to_string(),
            id: participant.external_id.clone(),
        }),
    }
}

async fn upsert_profile_on(
    conn: &Connection,
    profile: &ParticipantProfile,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO participant_profiles (participant_id, skill_level, goals, barriers, summary, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(participant_id) DO UPDATE SET
            skill_level = excluded.skill_level,
            goals = excluded.goals,
            barriers = excluded.barriers,
            summary = excluded.summary,
            created_at = excluded.created_at",
        params![
            profile.participant_id.as_str(),
            profile.skill_level.as_str(),
            profile.goals.as_str(),
            profile.barriers.as_str(),
            profile.summary.as_str(),
            profile.created_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("save_profile: {e}")))?;
    Ok(())
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let _write = self.gate.write().await;
        migrations::run_migrations(self.conn()).await
    }

    // ── Sessions ────────────────────────────────────────────────────

    async fn insert_session(&self, session: &WorkshopSession) -> Result<(), DatabaseError> {
        let _write = self.gate.write().await;
        self.conn()
            .execute(
                "INSERT INTO workshop_sessions (id, created_at) VALUES (?1, ?2)",
                params![session.id.as_str(), session.created_at.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_session: {e}")))?;
        debug!(session = %session.id, "Session stored");
        Ok(())
    }

    async fn latest_session(&self) -> Result<Option<WorkshopSession>, DatabaseError> {
        let _read = self.gate.read().await;
        let mut rows = self
            .conn()
            .query(
                "SELECT id, created_at FROM workshop_sessions ORDER BY created_at DESC, rowid DESC LIMIT 1",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("latest_session: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("latest_session: {e}")))?
        {
            Some(row) => Ok(Some(WorkshopSession {
                id: get_text(&row, 0, "latest_session")?,
                created_at: parse_datetime(&get_text(&row, 1, "latest_session")?),
            })),
            None => Ok(None),
        }
    }

    // ── Participants ────────────────────────────────────────────────

    async fn upsert_participant(
        &self,
        external_id: &str,
        session_id: &str,
    ) -> Result<UpsertOutcome, DatabaseError> {
        let _write = self.gate.write().await;
        let fresh = Participant::new(external_id, session_id);
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO participants (external_id, session_id, state, turn, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(external_id) DO NOTHING",
                params![
                    fresh.external_id.as_str(),
                    fresh.session_id.as_str(),
                    fresh.state.as_str(),
                    i64::from(fresh.turn),
                    fresh.created_at.to_rfc3339(),
                    fresh.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_participant: {e}")))?;

        let mut stored = self
            .query_participants(
                "upsert_participant",
                &format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE external_id = ?1"),
                params![external_id],
            )
            .await?;
        let participant = stored.pop().ok_or_else(|| DatabaseError::NotFound {
            entity: "participant".to_string(),
            id: external_id.to_string(),
        })?;

        Ok(UpsertOutcome {
            participant,
            created: inserted == 1,
        })
    }

    async fn get_participant(
        &self,
        external_id: &str,
    ) -> Result<Option<Participant>, DatabaseError> {
        let _read = self.gate.read().await;
        let mut found = self
            .query_participants(
                "get_participant",
                &format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE external_id = ?1"),
                params![external_id],
            )
            .await?;
        Ok(found.pop())
    }

    async fn update_participant(&self, participant: &Participant) -> Result<(), DatabaseError> {
        let _write = self.gate.write().await;
        update_participant_on(self.conn(), participant).await
    }

    async fn list_participants(&self, session_id: &str) -> Result<Vec<Participant>, DatabaseError> {
        let _read = self.gate.read().await;
        self.query_participants(
            "list_participants",
            &format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE session_id = ?1 ORDER BY rowid ASC"
            ),
            params![session_id],
        )
        .await
    }

    // ── Conversation turns ──────────────────────────────────────────

    async fn append_turn(&self, turn: &ConversationTurn) -> Result<(), DatabaseError> {
        let _write = self.gate.write().await;
        insert_turn_on(self.conn(), turn).await
    }

    async fn list_turns(
        &self,
        participant_id: &str,
        phase: Option<TurnPhase>,
    ) -> Result<Vec<ConversationTurn>, DatabaseError> {
        let _read = self.gate.read().await;
        match phase {
            Some(phase) => {
                self.query_turns(
                    "list_turns",
                    &format!(
                        "SELECT {TURN_COLUMNS} FROM conversation_turns
                         WHERE participant_id = ?1 AND phase = ?2 ORDER BY seq ASC"
                    ),
                    params![participant_id, phase.as_str()],
                )
                .await
            }
            None => {
                self.query_turns(
                    "list_turns",
                    &format!(
                        "SELECT {TURN_COLUMNS} FROM conversation_turns
                         WHERE participant_id = ?1 ORDER BY seq ASC"
                    ),
                    params![participant_id],
                )
                .await
            }
        }
    }

    async fn commit_turns(
        &self,
        participant: &Participant,
        turns: &[ConversationTurn],
    ) -> Result<(), DatabaseError> {
        let _write = self.gate.write().await;
        let tx = self.begin("commit_turns").await?;
        let result = async {
            for turn in turns {
                insert_turn_on(&tx, turn).await?;
            }
            update_participant_on(&tx, participant).await
        }
        .await;
        Self::finish(tx, "commit_turns", result).await?;
        debug!(
            participant = %participant.external_id,
            turns = turns.len(),
            state = %participant.state,
            turn = participant.turn,
            "Turns committed"
        );
        Ok(())
    }

    // ── Profiles ────────────────────────────────────────────────────

    async fn save_profile(&self, profile: &ParticipantProfile) -> Result<(), DatabaseError> {
        let _write = self.gate.write().await;
        upsert_profile_on(self.conn(), profile).await
    }

    async fn get_profile(
        &self,
        participant_id: &str,
    ) -> Result<Option<ParticipantProfile>, DatabaseError> {
        let _read = self.gate.read().await;
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PROFILE_COLUMNS} FROM participant_profiles WHERE participant_id = ?1"
                ),
                params![participant_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_profile: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_profile: {e}")))?
        {
            Some(row) => Ok(Some(row_to_profile(&row, 0)?)),
            None => Ok(None),
        }
    }

    async fn complete_profile(
        &self,
        participant: &Participant,
        profile: &ParticipantProfile,
    ) -> Result<(), DatabaseError> {
        let _write = self.gate.write().await;
        let tx = self.begin("complete_profile").await?;
        let result = async {
            upsert_profile_on(&tx, profile).await?;
            update_participant_on(&tx, participant).await
        }
        .await;
        Self::finish(tx, "complete_profile", result).await
    }

    async fn list_profiled_participants(
        &self,
        session_id: &str,
    ) -> Result<Vec<(Participant, ParticipantProfile)>, DatabaseError> {
        let _read = self.gate.read().await;
        let mut rows = self
            .conn()
            .query(
                "SELECT p.external_id, p.session_id, p.name, p.creative_role, p.state, p.turn,
                        p.created_at, p.updated_at,
                        pr.participant_id, pr.skill_level, pr.goals, pr.barriers, pr.summary, pr.created_at
                 FROM participants p
                 JOIN participant_profiles pr ON pr.participant_id = p.external_id
                 WHERE p.session_id = ?1 AND p.state IN ('profile_ready', 'group_phase')
                 ORDER BY p.rowid ASC",
                params![session_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_profiled_participants: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_profiled_participants: {e}")))?
        {
            out.push((row_to_participant(&row, 0)?, row_to_profile(&row, 8)?));
        }
        Ok(out)
    }

    // ── Groups ──────────────────────────────────────────────────────

    async fn replace_groups(
        &self,
        session_id: &str,
        groups: &[Group],
    ) -> Result<Vec<Group>, DatabaseError> {
        let _write = self.gate.write().await;
        let now = Utc::now().to_rfc3339();
        let tx = self.begin("replace_groups").await?;

        let result = async {
            let superseded = tx
                .execute(
                    "UPDATE groups SET superseded_at = ?2 WHERE session_id = ?1 AND superseded_at IS NULL",
                    params![session_id, now.as_str()],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("replace_groups: supersede: {e}")))?;

            let mut stored = Vec::with_capacity(groups.len());
            for group in groups {
                tx.execute(
                    "INSERT INTO groups (id, session_id, number, name, rationale, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        group.id.to_string(),
                        session_id,
                        i64::from(group.number),
                        group.name.as_str(),
                        group.rationale.as_str(),
                        group.created_at.to_rfc3339(),
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("replace_groups: insert group: {e}")))?;

                let mut kept = group.clone();
                kept.members.clear();
                for member in &group.members {
                    // Members who closed or left the profiled states since the
                    // snapshot was taken are dropped here.
                    let advanced = tx
                        .execute(
                            "UPDATE participants SET state = 'group_phase', updated_at = ?3
                             WHERE external_id = ?1 AND session_id = ?2
                               AND state IN ('profile_ready', 'group_phase')",
                            params![member.as_str(), session_id, now.as_str()],
                        )
                        .await
                        .map_err(|e| {
                            DatabaseError::Query(format!("replace_groups: advance member: {e}"))
                        })?;
                    if advanced == 0 {
                        debug!(participant = %member, "Skipping member no longer groupable");
                        continue;
                    }

                    tx.execute(
                        "INSERT INTO group_members (group_id, participant_id, position) VALUES (?1, ?2, ?3)",
                        params![group.id.to_string(), member.as_str(), kept.members.len() as i64],
                    )
                    .await
                    .map_err(|e| DatabaseError::Query(format!("replace_groups: insert member: {e}")))?;
                    kept.members.push(member.clone());
                }
                stored.push(kept);
            }

            Ok::<_, DatabaseError>((superseded, stored))
        }
        .await;
        let (superseded, stored) = Self::finish(tx, "replace_groups", result).await?;
        info!(
            session = %session_id,
            groups = stored.len(),
            superseded,
            "Group set replaced"
        );
        Ok(stored)
    }

    async fn list_groups(&self, session_id: &str) -> Result<Vec<Group>, DatabaseError> {
        let _read = self.gate.read().await;
        self.query_groups(
            "list_groups",
            &format!(
                "SELECT {GROUP_COLUMNS} FROM groups
                 WHERE session_id = ?1 AND superseded_at IS NULL ORDER BY number ASC"
            ),
            params![session_id],
        )
        .await
    }

    async fn get_group(
        &self,
        session_id: &str,
        number: u32,
    ) -> Result<Option<Group>, DatabaseError> {
        let _read = self.gate.read().await;
        let mut found = self
            .query_groups(
                "get_group",
                &format!(
                    "SELECT {GROUP_COLUMNS} FROM groups
                     WHERE session_id = ?1 AND number = ?2 AND superseded_at IS NULL"
                ),
                params![session_id, i64::from(number)],
            )
            .await?;
        Ok(found.pop())
    }

    async fn group_for_participant(
        &self,
        participant_id: &str,
    ) -> Result<Option<Group>, DatabaseError> {
        let _read = self.gate.read().await;
        let mut found = self
            .query_groups(
                "group_for_participant",
                "SELECT g.id, g.session_id, g.number, g.name, g.rationale, g.created_at, g.superseded_at
                 FROM groups g
                 JOIN group_members m ON m.group_id = g.id
                 JOIN participants p ON p.external_id = m.participant_id
                 WHERE m.participant_id = ?1
                   AND g.session_id = p.session_id
                   AND g.superseded_at IS NULL
                 LIMIT 1",
                params![participant_id],
            )
            .await?;
        Ok(found.pop())
    }

    async fn append_group_turn(&self, turn: &GroupTurn) -> Result<(), DatabaseError> {
        let _write = self.gate.write().await;
        self.conn()
            .execute(
                "INSERT INTO group_turns (id, group_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    turn.id.to_string(),
                    turn.group_id.to_string(),
                    turn.role.as_str(),
                    turn.content.as_str(),
                    turn.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_group_turn: {e}")))?;
        Ok(())
    }

    async fn list_group_turns(&self, group_id: Uuid) -> Result<Vec<GroupTurn>, DatabaseError> {
        let _read = self.gate.read().await;
        self.query_group_turns(
            "list_group_turns",
            &format!("SELECT {GROUP_TURN_COLUMNS} FROM group_turns WHERE group_id = ?1 ORDER BY seq ASC"),
            params![group_id.to_string()],
        )
        .await
    }

    // ── Export ──────────────────────────────────────────────────────

    async fn export_snapshot(&self) -> Result<ExportSnapshot, DatabaseError> {
        let _read = self.gate.read().await;

        let mut sessions = Vec::new();
        let mut rows = self
            .conn()
            .query(
                "SELECT id, created_at FROM workshop_sessions ORDER BY created_at ASC, rowid ASC",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("export_snapshot: sessions: {e}")))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("export_snapshot: sessions: {e}")))?
        {
            sessions.push(WorkshopSession {
                id: get_text(&row, 0, "export_snapshot")?,
                created_at: parse_datetime(&get_text(&row, 1, "export_snapshot")?),
            });
        }

        let participants = self
            .query_participants(
                "export_snapshot: participants",
                &format!("SELECT {PARTICIPANT_COLUMNS} FROM participants ORDER BY rowid ASC"),
                (),
            )
            .await?;

        let turns = self
            .query_turns(
                "export_snapshot: turns",
                &format!("SELECT {TURN_COLUMNS} FROM conversation_turns ORDER BY seq ASC"),
                (),
            )
            .await?;

        let mut profiles = Vec::new();
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PROFILE_COLUMNS} FROM participant_profiles ORDER BY rowid ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("export_snapshot: profiles: {e}")))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("export_snapshot: profiles: {e}")))?
        {
            profiles.push(row_to_profile(&row, 0)?);
        }

        let groups = self
            .query_groups(
                "export_snapshot: groups",
                &format!("SELECT {GROUP_COLUMNS} FROM groups ORDER BY created_at ASC, number ASC"),
                (),
            )
            .await?;

        let group_turns = self
            .query_group_turns(
                "export_snapshot: group_turns",
                &format!("SELECT {GROUP_TURN_COLUMNS} FROM group_turns ORDER BY seq ASC"),
                (),
            )
            .await?;

        Ok(ExportSnapshot {
            exported_at: Utc::now(),
            sessions,
            participants,
            turns,
            profiles,
            groups,
            group_turns,
        })
    }
}

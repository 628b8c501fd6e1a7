// SQLite implementations of the store and pool interfaces

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use std::str::FromStr;

use super::errors::{StoreError, WorkflowError};
use super::traits::{AppointmentStore, AvailabilityPool, HistoryStore};
use super::types::*;

const APPOINTMENT_COLUMNS: &str = "id, status, doctor_id, patient_id, clinic_id, scheduled_date, \
     duration_minutes, appointment_type, previous_appointment_id, availability_id, request_id, \
     token, version, created_at, updated_at";

fn decode<T: FromStr<Err = WorkflowError>>(value: &str) -> Result<T, StoreError> {
    value
        .parse()
        .map_err(|e| StoreError::Backend(format!("corrupt row: {e}")))
}

fn minutes(value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Backend(format!("corrupt duration {value}")))
}

fn appointment_from_row(row: &SqliteRow) -> Result<Appointment, StoreError> {
    let status: String = row.try_get("status")?;
    let duration: i64 = row.try_get("duration_minutes")?;

    Ok(Appointment {
        id: row.try_get("id")?,
        status: decode(&status)?,
        doctor_id: row.try_get("doctor_id")?,
        patient_id: row.try_get("patient_id")?,
        clinic_id: row.try_get("clinic_id")?,
        scheduled_date: row.try_get("scheduled_date")?,
        duration_minutes: minutes(duration)?,
        appointment_type: row.try_get("appointment_type")?,
        previous_appointment_id: row.try_get("previous_appointment_id")?,
        availability_id: row.try_get("availability_id")?,
        request_id: row.try_get("request_id")?,
        token: row.try_get("token")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn history_from_row(row: &SqliteRow) -> Result<StatusHistoryEntry, StoreError> {
    let previous: Option<String> = row.try_get("previous_status")?;
    let new_status: String = row.try_get("new_status")?;
    let action: String = row.try_get("action")?;

    Ok(StatusHistoryEntry {
        id: row.try_get("id")?,
        appointment_id: row.try_get("appointment_id")?,
        previous_status: previous
            .as_deref()
            .map(|s| decode(s))
            .transpose()?,
        new_status: decode(&new_status)?,
        action: decode(&action)?,
        actor_id: row.try_get("actor_id")?,
        timestamp: row.try_get("created_at")?,
    })
}

fn reason_from_row(row: &SqliteRow) -> Result<ReasonRecord, StoreError> {
    let action: String = row.try_get("action")?;
    let reason: String = row.try_get("reason_code")?;

    Ok(ReasonRecord {
        appointment_id: row.try_get("appointment_id")?,
        action: decode(&action)?,
        reason: decode(&reason)?,
        note: row.try_get("note")?,
        actor_id: row.try_get("actor_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn not_found(id: AppointmentId) -> StoreError {
    StoreError::NotFound {
        entity: "appointment",
        id,
    }
}

async fn fetch_appointment(
    conn: &mut SqliteConnection,
    id: AppointmentId,
) -> Result<Option<Appointment>, StoreError> {
    let sql = format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1");
    let row = sqlx::query(&sql).bind(id).fetch_optional(conn).await?;
    row.as_ref().map(appointment_from_row).transpose()
}

async fn insert_appointment(
    conn: &mut SqliteConnection,
    new: &NewAppointment,
    token: &str,
    at: DateTime<Utc>,
) -> Result<AppointmentId, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO appointments (
            status, doctor_id, patient_id, clinic_id, scheduled_date, duration_minutes,
            appointment_type, previous_appointment_id, availability_id, request_id,
            token, version, created_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12, ?12)
        "#,
    )
    .bind(AppointmentStatus::Schedule.as_str())
    .bind(new.doctor_id)
    .bind(new.patient_id)
    .bind(new.clinic_id)
    .bind(new.scheduled_date)
    .bind(i64::from(new.duration_minutes))
    .bind(new.appointment_type.as_deref())
    .bind(new.previous_appointment_id)
    .bind(new.availability_id)
    .bind(new.request_id)
    .bind(token)
    .bind(at)
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

async fn insert_history(
    conn: &mut SqliteConnection,
    entry: NewHistoryEntry,
) -> Result<StatusHistoryEntry, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO appointment_status_history
            (appointment_id, previous_status, new_status, action, actor_id, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(entry.appointment_id)
    .bind(entry.previous_status.map(|s| s.as_str()))
    .bind(entry.new_status.as_str())
    .bind(entry.action.as_str())
    .bind(entry.actor_id)
    .bind(entry.timestamp)
    .execute(conn)
    .await?;

    Ok(StatusHistoryEntry {
        id: result.last_insert_rowid(),
        appointment_id: entry.appointment_id,
        previous_status: entry.previous_status,
        new_status: entry.new_status,
        action: entry.action,
        actor_id: entry.actor_id,
        timestamp: entry.timestamp,
    })
}

async fn insert_reason(conn: &mut SqliteConnection, reason: &ReasonRecord) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO appointment_reasons
            (appointment_id, action, reason_code, note, actor_id, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(reason.appointment_id)
    .bind(reason.action.as_str())
    .bind(reason.reason.as_str())
    .bind(reason.note.as_deref())
    .bind(reason.actor_id)
    .bind(reason.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

fn push_filter<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filter: &AppointmentFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(doctor_id) = filter.doctor_id {
        builder.push(" AND doctor_id = ").push_bind(doctor_id);
    }
    if let Some(patient_id) = filter.patient_id {
        builder.push(" AND patient_id = ").push_bind(patient_id);
    }
    if let Some(clinic_id) = filter.clinic_id {
        builder.push(" AND clinic_id = ").push_bind(clinic_id);
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
}

/// Appointments, status history and reasons in one SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteAppointmentStore {
    pool: SqlitePool,
}

impl SqliteAppointmentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AppointmentStore for SqliteAppointmentStore {
    async fn load_by_id(&self, id: AppointmentId) -> Result<Appointment, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_appointment(&mut conn, id).await?.ok_or_else(|| not_found(id))
    }

    async fn insert(
        &self,
        new: NewAppointment,
        token: String,
        mut history: NewHistoryEntry,
    ) -> Result<(Appointment, StatusHistoryEntry), StoreError> {
        let mut tx = self.pool.begin().await?;

        let id = insert_appointment(&mut tx, &new, &token, history.timestamp).await?;
        history.appointment_id = id;
        let entry = insert_history(&mut tx, history).await?;
        let appointment = fetch_appointment(&mut tx, id).await?.ok_or_else(|| not_found(id))?;

        tx.commit().await?;
        Ok((appointment, entry))
    }

    async fn update_atomically(
        &self,
        id: AppointmentId,
        expected: ExpectedState,
        mutation: AppointmentMutation,
    ) -> Result<CommittedMutation, StoreError> {
        let AppointmentMutation {
            changes,
            history,
            reason,
            successor,
        } = mutation;

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE appointments
            SET status = ?1, doctor_id = ?2, scheduled_date = ?3, duration_minutes = ?4,
                appointment_type = ?5, availability_id = ?6, updated_at = ?7, version = version + 1
            WHERE id = ?8 AND status = ?9 AND version = ?10
            "#,
        )
        .bind(changes.status.as_str())
        .bind(changes.doctor_id)
        .bind(changes.scheduled_date)
        .bind(i64::from(changes.duration_minutes))
        .bind(changes.appointment_type.as_deref())
        .bind(changes.availability_id)
        .bind(changes.updated_at)
        .bind(id)
        .bind(expected.status.as_str())
        .bind(expected.version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists = fetch_appointment(&mut tx, id).await?.is_some();
            tx.rollback().await?;
            debug!(appointment_id = id, exists, "Conditional update matched no row");
            return Err(if exists {
                StoreError::Conflict {
                    entity: "appointment",
                    id,
                }
            } else {
                not_found(id)
            });
        }

        let actor_id = history.actor_id;
        let history = insert_history(&mut tx, history).await?;

        if let Some(ref reason) = reason {
            insert_reason(&mut tx, reason).await?;
        }

        let successor = match successor {
            Some(successor) => {
                let successor_id = insert_appointment(
                    &mut tx,
                    &successor.appointment,
                    &successor.token,
                    changes.updated_at,
                )
                .await?;
                insert_history(
                    &mut tx,
                    NewHistoryEntry {
                        appointment_id: successor_id,
                        previous_status: None,
                        new_status: AppointmentStatus::Schedule,
                        action: ActionType::RescheduleAppt,
                        actor_id,
                        timestamp: changes.updated_at,
                    },
                )
                .await?;
                fetch_appointment(&mut tx, successor_id).await?
            }
            None => None,
        };

        let appointment = fetch_appointment(&mut tx, id).await?.ok_or_else(|| not_found(id))?;
        tx.commit().await?;

        Ok(CommittedMutation {
            appointment,
            history,
            reason,
            successor,
        })
    }

    async fn list(
        &self,
        filter: &AppointmentFilter,
        page: Pagination,
    ) -> Result<Page<Appointment>, StoreError> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS total FROM appointments");
        push_filter(&mut count, filter);
        let total: i64 = count
            .build()
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;

        let mut select = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments"
        ));
        push_filter(&mut select, filter);
        select
            .push(" ORDER BY scheduled_date ASC, id ASC LIMIT ")
            .push_bind(i64::from(page.per_page()))
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);

        let rows = select.build().fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(appointment_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            total: total.max(0) as u64,
            page: page.page(),
            per_page: page.per_page(),
        })
    }

    async fn reasons(&self, id: AppointmentId) -> Result<Vec<ReasonRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT appointment_id, action, reason_code, note, actor_id, created_at
            FROM appointment_reasons
            WHERE appointment_id = ?1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(reason_from_row).collect()
    }
}

#[async_trait]
impl HistoryStore for SqliteAppointmentStore {
    async fn append(&self, entry: NewHistoryEntry) -> Result<StatusHistoryEntry, StoreError> {
        let mut conn = self.pool.acquire().await?;
        if fetch_appointment(&mut conn, entry.appointment_id).await?.is_none() {
            return Err(not_found(entry.appointment_id));
        }
        insert_history(&mut conn, entry).await
    }

    async fn history(
        &self,
        appointment_id: AppointmentId,
    ) -> Result<Vec<StatusHistoryEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, appointment_id, previous_status, new_status, action, actor_id, created_at
            FROM appointment_status_history
            WHERE appointment_id = ?1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(appointment_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(history_from_row).collect()
    }
}

#[derive(Debug, Clone)]
pub struct SqliteAvailabilityPool {
    pool: SqlitePool,
}

impl SqliteAvailabilityPool {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_slot(
        &self,
        doctor_id: i64,
        clinic_id: i64,
        start_time: DateTime<Utc>,
        duration_minutes: u32,
    ) -> Result<AvailabilitySlot, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO availabilities (doctor_id, clinic_id, start_time, duration_minutes, reserved)
            VALUES (?1, ?2, ?3, ?4, 0)
            "#,
        )
        .bind(doctor_id)
        .bind(clinic_id)
        .bind(start_time)
        .bind(i64::from(duration_minutes))
        .execute(&self.pool)
        .await?;

        Ok(AvailabilitySlot {
            id: result.last_insert_rowid(),
            doctor_id,
            clinic_id,
            start_time,
            duration_minutes,
            reserved: false,
        })
    }

    pub async fn slot(&self, id: AvailabilityId) -> Result<Option<AvailabilitySlot>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, doctor_id, clinic_id, start_time, duration_minutes, reserved
            FROM availabilities
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<AvailabilitySlot, StoreError> {
            let duration: i64 = row.try_get("duration_minutes")?;
            let reserved: i64 = row.try_get("reserved")?;
            Ok(AvailabilitySlot {
                id: row.try_get("id")?,
                doctor_id: row.try_get("doctor_id")?,
                clinic_id: row.try_get("clinic_id")?,
                start_time: row.try_get("start_time")?,
                duration_minutes: minutes(duration)?,
                reserved: reserved != 0,
            })
        })
        .transpose()
    }

    async fn exists(&self, id: AvailabilityId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM availabilities WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

fn slot_not_found(id: AvailabilityId) -> StoreError {
    StoreError::NotFound {
        entity: "availability",
        id,
    }
}

#[async_trait]
impl AvailabilityPool for SqliteAvailabilityPool {
    async fn reserve(&self, id: AvailabilityId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE availabilities SET reserved = 1 WHERE id = ?1 AND reserved = 0")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(if self.exists(id).await? {
                StoreError::Conflict {
                    entity: "availability",
                    id,
                }
            } else {
                slot_not_found(id)
            });
        }
        Ok(())
    }

    async fn release(&self, id: AvailabilityId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE availabilities SET reserved = 0 WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(slot_not_found(id));
        }
        Ok(())
    }

    async fn retain(&self, id: AvailabilityId) -> Result<(), StoreError> {
        if self.exists(id).await? {
            Ok(())
        } else {
            Err(slot_not_found(id))
        }
    }
}

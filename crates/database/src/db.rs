//! Postgres-backed inventory.
#![allow(missing_docs, clippy::missing_docs_in_private_items)]

use crate::models::{DeviceRow, FtpSettingsRow};

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::{
    pooled_connection::{bb8::Pool, AsyncDieselConnectionManager},
    AsyncPgConnection, RunQueryDsl,
};
use inventory::{DeviceRecord, DeviceVersions, FinalStatus, Inventory, Settings};
use routeros_logic::{truncate_message, MAX_MESSAGE_CHARS};

#[derive(Debug)]
/// The inventory stored in the database.
pub struct Db {
    /// Pool.
    pub pool: Pool<AsyncPgConnection>,
}

impl Db {
    pub async fn connect(database_url: &str) -> Result<Self, anyhow::Error> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder().build(manager).await?;
        Ok(Db { pool })
    }
}

#[async_trait]
impl Inventory for Db {
    async fn load_devices(&self) -> Result<Vec<DeviceRecord>, anyhow::Error> {
        let mut conn = self.pool.get().await?;
        use crate::schema::mikrotik_devices::dsl::*;

        let rows = mikrotik_devices
            .select(DeviceRow::as_select())
            .order(id.asc())
            .get_results(&mut conn)
            .await?;

        Ok(rows.into_iter().map(DeviceRecord::from).collect())
    }

    async fn load_settings(&self) -> Result<Settings, anyhow::Error> {
        let mut conn = self.pool.get().await?;

        let telegram_token = {
            use crate::schema::telegram_settings::dsl::*;
            telegram_settings
                .select(token)
                .order(id.asc())
                .first::<String>(&mut conn)
                .await
                .optional()?
        };

        let ftp = {
            use crate::schema::ftp_settings::dsl::*;
            ftp_settings
                .select(FtpSettingsRow::as_select())
                .order(id.asc())
                .first(&mut conn)
                .await
                .optional()?
        };

        Ok(Settings {
            telegram_token: telegram_token.filter(|value| !value.trim().is_empty()),
            ftp: ftp.map(Into::into),
        })
    }

    async fn load_chat_ids(&self) -> Result<Vec<i64>, anyhow::Error> {
        let mut conn = self.pool.get().await?;
        use crate::schema::telegram_chat_ids::dsl::*;

        let values = telegram_chat_ids
            .select(chat_id)
            .order(chat_id.asc())
            .get_results(&mut conn)
            .await?;

        Ok(values)
    }

    async fn add_chat_id(&self, new_chat_id: i64) -> Result<bool, anyhow::Error> {
        let mut conn = self.pool.get().await?;
        use crate::schema::telegram_chat_ids::dsl::*;

        let inserted = diesel::insert_into(telegram_chat_ids)
            .values(chat_id.eq(new_chat_id))
            .on_conflict(chat_id)
            .do_nothing()
            .execute(&mut conn)
            .await?;

        Ok(inserted > 0)
    }

    async fn update_device_status(
        &self,
        device_id: i32,
        status: &str,
        final_status: FinalStatus,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.pool.get().await?;
        use crate::schema::mikrotik_devices::dsl::*;

        diesel::update(mikrotik_devices.filter(id.eq(device_id)))
            .set((
                backup_status.eq(truncate_message(status, MAX_MESSAGE_CHARS)),
                backup_status_final.eq(final_status.as_str()),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn update_versions(
        &self,
        device_id: i32,
        versions: &DeviceVersions,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.pool.get().await?;
        use crate::schema::mikrotik_devices::dsl::*;

        diesel::update(mikrotik_devices.filter(id.eq(device_id)))
            .set((
                installed_version.eq(versions.installed_version.as_deref()),
                latest_version.eq(versions.latest_version.as_deref()),
                routerboard_firmware.eq(versions.routerboard_firmware.as_deref()),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }
}

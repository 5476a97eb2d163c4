use anyhow::{anyhow, Result};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use r2d2_sqlite::SqliteConnectionManager;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::config::{DetourageMode, MonitorConfig};
use crate::raster::{Mask, Raster};
use crate::storage::{Artwork, ArtworkMode, TemplateFingerprint};

/// SQLite-backed store for artworks, reference rasters and the config row.
///
/// Cheap to clone; clones share the underlying connection pool. The control
/// API and the scan loop each hold one and never coordinate beyond the
/// database itself.
#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    /// Opens (creating if needed) the database at `path` and runs schema
    /// setup plus best-effort additive migrations.
    pub fn open(path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path)
            .with_flags(
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI,
            )
            .with_init(|c| {
                c.busy_timeout(std::time::Duration::from_millis(500))?;
                c.pragma_update(None, "journal_mode", "WAL")?;
                Ok(())
            });

        let pool = Pool::builder()
            .max_size(16)
            .connection_timeout(std::time::Duration::from_secs(5))
            .build(manager)?;

        let store = Self { pool };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS config(
                id INTEGER PRIMARY KEY CHECK(id=1),
                guild_id TEXT, channel_id TEXT, discord_webhook TEXT,
                poll_ms INTEGER, scan_hz REAL, tolerance INTEGER,
                suspicion_threshold INTEGER, degradation_threshold INTEGER,
                stride INTEGER, staged_scan INTEGER,
                tile_w INTEGER, tile_h INTEGER, tiles_per_tick INTEGER,
                ignore_outside INTEGER,
                tiles_global_per_tick INTEGER,
                one_tile_per_artwork INTEGER,
                detourage_mode TEXT
            );
            CREATE TABLE IF NOT EXISTS artworks(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                x INTEGER, y INTEGER, w INTEGER, h INTEGER,
                added_at TEXT NOT NULL,
                mode TEXT DEFAULT 'build'
            );
            CREATE TABLE IF NOT EXISTS baselines(
                artwork_id INTEGER PRIMARY KEY,
                w INTEGER NOT NULL, h INTEGER NOT NULL,
                rgba BLOB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS grounds(
                artwork_id INTEGER PRIMARY KEY,
                w INTEGER NOT NULL, h INTEGER NOT NULL,
                rgba BLOB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS templates(
                artwork_id INTEGER PRIMARY KEY,
                w INTEGER NOT NULL, h INTEGER NOT NULL,
                rgba BLOB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS masks(
                artwork_id INTEGER PRIMARY KEY,
                w INTEGER NOT NULL, h INTEGER NOT NULL,
                mask BLOB NOT NULL
            );",
        )?;

        // Seed the singleton config row on first run.
        let defaults = MonitorConfig::default();
        conn.execute(
            "INSERT OR IGNORE INTO config
               (id, guild_id, channel_id, discord_webhook, poll_ms, scan_hz,
                tolerance, suspicion_threshold, degradation_threshold,
                stride, staged_scan, tile_w, tile_h, tiles_per_tick,
                ignore_outside, tiles_global_per_tick, one_tile_per_artwork,
                detourage_mode)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                     ?13, ?14, ?15, ?16, ?17)",
            params![
                defaults.guild_id,
                defaults.channel_id,
                defaults.discord_webhook,
                defaults.poll_ms,
                defaults.scan_hz,
                defaults.tolerance,
                defaults.suspicion_threshold,
                defaults.degradation_threshold,
                defaults.stride,
                defaults.staged_scan as i64,
                defaults.tile_w,
                defaults.tile_h,
                defaults.tiles_per_tick,
                defaults.ignore_outside as i64,
                defaults.tiles_global_per_tick,
                defaults.one_tile_per_artwork as i64,
                defaults.detourage_mode.as_str(),
            ],
        )?;

        // Additive migrations for databases created by older schema versions.
        // Each one fails harmlessly when the column already exists.
        try_alter(&conn, "ALTER TABLE config ADD COLUMN scan_hz REAL DEFAULT 1.0");
        try_alter(&conn, "ALTER TABLE config ADD COLUMN tile_w INTEGER DEFAULT 100");
        try_alter(&conn, "ALTER TABLE config ADD COLUMN tile_h INTEGER DEFAULT 100");
        try_alter(
            &conn,
            "ALTER TABLE config ADD COLUMN tiles_per_tick INTEGER DEFAULT 1",
        );
        try_alter(
            &conn,
            "ALTER TABLE config ADD COLUMN ignore_outside INTEGER DEFAULT 1",
        );
        try_alter(
            &conn,
            "ALTER TABLE config ADD COLUMN tiles_global_per_tick INTEGER DEFAULT 64",
        );
        try_alter(
            &conn,
            "ALTER TABLE config ADD COLUMN one_tile_per_artwork INTEGER DEFAULT 1",
        );
        try_alter(
            &conn,
            "ALTER TABLE config ADD COLUMN detourage_mode TEXT DEFAULT 'alpha_only'",
        );
        try_alter(&conn, "ALTER TABLE artworks ADD COLUMN mode TEXT DEFAULT 'build'");

        Ok(())
    }

    // ---------- config ----------

    /// Reads the singleton config row. Missing or unparsable fields fall
    /// back to the defaults instead of failing the caller.
    pub fn config(&self) -> Result<MonitorConfig> {
        let conn = self.conn()?;
        let defaults = MonitorConfig::default();
        let cfg = conn
            .query_row("SELECT * FROM config WHERE id=1", [], |row| {
                Ok(MonitorConfig {
                    guild_id: row.get("guild_id").unwrap_or_default(),
                    channel_id: row.get("channel_id").unwrap_or_default(),
                    discord_webhook: row.get("discord_webhook").unwrap_or_default(),
                    poll_ms: row.get("poll_ms").unwrap_or(defaults.poll_ms),
                    scan_hz: row.get("scan_hz").unwrap_or(defaults.scan_hz),
                    tolerance: row.get("tolerance").unwrap_or(defaults.tolerance),
                    suspicion_threshold: row
                        .get("suspicion_threshold")
                        .unwrap_or(defaults.suspicion_threshold),
                    degradation_threshold: row
                        .get("degradation_threshold")
                        .unwrap_or(defaults.degradation_threshold),
                    stride: row.get("stride").unwrap_or(defaults.stride),
                    staged_scan: row
                        .get::<_, i64>("staged_scan")
                        .map(|v| v != 0)
                        .unwrap_or(defaults.staged_scan),
                    tile_w: row.get("tile_w").unwrap_or(defaults.tile_w),
                    tile_h: row.get("tile_h").unwrap_or(defaults.tile_h),
                    tiles_per_tick: row
                        .get("tiles_per_tick")
                        .unwrap_or(defaults.tiles_per_tick),
                    tiles_global_per_tick: row
                        .get("tiles_global_per_tick")
                        .unwrap_or(defaults.tiles_global_per_tick),
                    one_tile_per_artwork: row
                        .get::<_, i64>("one_tile_per_artwork")
                        .map(|v| v != 0)
                        .unwrap_or(defaults.one_tile_per_artwork),
                    ignore_outside: row
                        .get::<_, i64>("ignore_outside")
                        .map(|v| v != 0)
                        .unwrap_or(defaults.ignore_outside),
                    detourage_mode: row
                        .get::<_, String>("detourage_mode")
                        .ok()
                        .and_then(|s| DetourageMode::parse(&s))
                        .unwrap_or_default(),
                })
            })
            .optional()?;
        Ok(cfg.unwrap_or(defaults))
    }

    /// Replaces the singleton config row with the clamped input and returns
    /// what was actually stored.
    pub fn put_config(&self, cfg: &MonitorConfig) -> Result<MonitorConfig> {
        let cfg = cfg.clamped();
        let conn = self.conn()?;
        conn.execute(
            "UPDATE config SET
                guild_id=?1, channel_id=?2, discord_webhook=?3, poll_ms=?4,
                scan_hz=?5, tolerance=?6, suspicion_threshold=?7,
                degradation_threshold=?8, stride=?9, staged_scan=?10,
                tile_w=?11, tile_h=?12, tiles_per_tick=?13,
                ignore_outside=?14, tiles_global_per_tick=?15,
                one_tile_per_artwork=?16, detourage_mode=?17
             WHERE id=1",
            params![
                cfg.guild_id,
                cfg.channel_id,
                cfg.discord_webhook,
                cfg.poll_ms,
                cfg.scan_hz,
                cfg.tolerance,
                cfg.suspicion_threshold,
                cfg.degradation_threshold,
                cfg.stride,
                cfg.staged_scan as i64,
                cfg.tile_w,
                cfg.tile_h,
                cfg.tiles_per_tick,
                cfg.ignore_outside as i64,
                cfg.tiles_global_per_tick,
                cfg.one_tile_per_artwork as i64,
                cfg.detourage_mode.as_str(),
            ],
        )?;
        Ok(cfg)
    }

    // ---------- artworks ----------

    pub fn create_artwork(&self, name: &str, x: i64, y: i64, w: i64, h: i64) -> Result<Artwork> {
        let added_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| anyhow!("timestamp formatting failed: {e}"))?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO artworks(name, x, y, w, h, added_at, mode)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'build')",
            params![name, x, y, w, h, added_at],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Artwork {
            id,
            name: name.to_string(),
            x,
            y,
            w,
            h,
            added_at,
            mode: ArtworkMode::Build,
        })
    }

    pub fn artwork(&self, id: i64) -> Result<Option<Artwork>> {
        let conn = self.conn()?;
        let art = conn
            .query_row(
                "SELECT id, name, x, y, w, h, added_at, mode FROM artworks WHERE id=?1",
                params![id],
                row_to_artwork,
            )
            .optional()?;
        Ok(art)
    }

    /// Artworks ordered by id ascending; the order the scheduler visits.
    pub fn artworks_asc(&self) -> Result<Vec<Artwork>> {
        self.list_artworks("SELECT id, name, x, y, w, h, added_at, mode FROM artworks ORDER BY id ASC")
    }

    /// Artworks ordered by id descending; the order the listing API serves.
    pub fn artworks_desc(&self) -> Result<Vec<Artwork>> {
        self.list_artworks("SELECT id, name, x, y, w, h, added_at, mode FROM artworks ORDER BY id DESC")
    }

    fn list_artworks(&self, sql: &str) -> Result<Vec<Artwork>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], row_to_artwork)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Deletes an artwork and every blob registered for it. Returns whether
    /// the artwork existed.
    pub fn delete_artwork(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM artworks WHERE id=?1", params![id])?;
        for table in ["baselines", "grounds", "templates", "masks"] {
            conn.execute(
                &format!("DELETE FROM {table} WHERE artwork_id=?1"),
                params![id],
            )?;
        }
        Ok(n > 0)
    }

    pub fn set_mode(&self, id: i64, mode: ArtworkMode) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE artworks SET mode=?1 WHERE id=?2",
            params![mode.as_str(), id],
        )?;
        Ok(n > 0)
    }

    // ---------- rasters ----------

    /// Stores the template for an artwork. When the template size differs
    /// from the artwork placement, the artwork is resized to match.
    pub fn set_template(&self, id: i64, template: &Raster) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO templates(artwork_id, w, h, rgba) VALUES (?1, ?2, ?3, ?4)",
            params![id, template.width(), template.height(), template.bytes()],
        )?;
        conn.execute(
            "UPDATE artworks SET w=?1, h=?2 WHERE id=?3 AND (w<>?1 OR h<>?2)",
            params![template.width() as i64, template.height() as i64, id],
        )?;
        Ok(())
    }

    pub fn template(&self, id: i64) -> Result<Option<Raster>> {
        self.rgba_blob(id, "templates")
    }

    /// Fingerprint of the stored template, `(0, 0, 0)` when absent. Reads
    /// only the blob length, not the blob.
    pub fn template_fingerprint(&self, id: i64) -> Result<TemplateFingerprint> {
        let conn = self.conn()?;
        let fp = conn
            .query_row(
                "SELECT w, h, length(rgba) FROM templates WHERE artwork_id=?1",
                params![id],
                |row| {
                    Ok(TemplateFingerprint {
                        w: row.get(0)?,
                        h: row.get(1)?,
                        bytes: row.get::<_, i64>(2)? as usize,
                    })
                },
            )
            .optional()?;
        Ok(fp.unwrap_or_default())
    }

    pub fn set_ground(&self, id: i64, ground: &Raster) -> Result<()> {
        self.put_rgba_blob(id, "grounds", ground)
    }

    pub fn ground(&self, id: i64) -> Result<Option<Raster>> {
        self.rgba_blob(id, "grounds")
    }

    pub fn set_baseline(&self, id: i64, baseline: &Raster) -> Result<()> {
        self.put_rgba_blob(id, "baselines", baseline)
    }

    pub fn baseline(&self, id: i64) -> Result<Option<Raster>> {
        self.rgba_blob(id, "baselines")
    }

    pub fn set_mask(&self, id: i64, mask: &Mask) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO masks(artwork_id, w, h, mask) VALUES (?1, ?2, ?3, ?4)",
            params![id, mask.width(), mask.height(), mask.bytes()],
        )?;
        Ok(())
    }

    pub fn mask(&self, id: i64) -> Result<Option<Mask>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT w, h, mask FROM masks WHERE artwork_id=?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                },
            )
            .optional()?;
        match row {
            Some((w, h, bytes)) => Ok(Some(Mask::from_bytes(w, h, bytes)?)),
            None => Ok(None),
        }
    }

    fn put_rgba_blob(&self, id: i64, table: &str, raster: &Raster) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!("INSERT OR REPLACE INTO {table}(artwork_id, w, h, rgba) VALUES (?1, ?2, ?3, ?4)"),
            params![id, raster.width(), raster.height(), raster.bytes()],
        )?;
        Ok(())
    }

    fn rgba_blob(&self, id: i64, table: &str) -> Result<Option<Raster>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT w, h, rgba FROM {table} WHERE artwork_id=?1"),
                params![id],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                },
            )
            .optional()?;
        match row {
            Some((w, h, bytes)) => Ok(Some(Raster::from_rgba(w, h, bytes)?)),
            None => Ok(None),
        }
    }
}

fn row_to_artwork(row: &r2d2_sqlite::rusqlite::Row<'_>) -> r2d2_sqlite::rusqlite::Result<Artwork> {
    Ok(Artwork {
        id: row.get(0)?,
        name: row.get(1)?,
        x: row.get(2)?,
        y: row.get(3)?,
        w: row.get(4)?,
        h: row.get(5)?,
        added_at: row.get(6)?,
        mode: row
            .get::<_, Option<String>>(7)?
            .as_deref()
            .and_then(ArtworkMode::parse)
            .unwrap_or_default(),
    })
}

fn try_alter(conn: &Connection, sql: &str) {
    let _ = conn.execute_batch(sql);
}

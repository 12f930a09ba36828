// Storage adapter (SQLite via sqlx).
//
// One adapter behind a narrow surface: list/insert/update/delete per
// collection plus the adoption-invariant operations. Every method
// normalizes vendor failures into `AppError` here at the boundary, so
// callers never see an `sqlx::Error`.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::error::AppError;
use crate::stats::BonusStats;

// ── Row models ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub display_name: Option<String>,
    pub role: String,
    pub bits: i64,
    pub manager_exp: i64,
    pub created_at: String,
}

/// Creature species definition (the adoptable catalog).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Anima {
    pub id: i64,
    pub species: String,
    pub image_data: String,
    pub level: String,
    pub attack: i64,
    pub defense: i64,
    pub max_health: i64,
    pub attack_speed: f64,
    pub critical_chance: i64,
    pub next_evolution_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Adversary species definition. Same base stats as a creature plus the
/// rewards granted on defeat.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Enemy {
    pub id: i64,
    pub species: String,
    pub image_data: String,
    pub level: String,
    pub attack: i64,
    pub defense: i64,
    pub max_health: i64,
    pub attack_speed: f64,
    pub critical_chance: i64,
    pub reward_exp: i64,
    pub reward_bits: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// One user-owned copy of a creature species.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserAnima {
    pub id: i64,
    pub user_id: i64,
    pub anima_id: i64,
    pub nickname: Option<String>,
    pub is_active: bool,
    pub current_exp: i64,
    pub attack_extra: i64,
    pub defense_extra: i64,
    pub max_health_extra: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Activity {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    pub message: String,
    pub created_at: String,
}

// ── Write payloads ───────────────────────────────────────────────────

/// Fields accepted when creating or replacing a creature species.
#[derive(Debug, Clone, Deserialize)]
pub struct AnimaInput {
    pub species: String,
    #[serde(default)]
    pub image_data: String,
    pub level: String,
    pub attack: i64,
    pub defense: i64,
    pub max_health: i64,
    pub attack_speed: f64,
    pub critical_chance: i64,
    pub next_evolution_id: Option<i64>,
}

/// Fields accepted when creating or replacing an adversary species.
#[derive(Debug, Clone, Deserialize)]
pub struct EnemyInput {
    pub species: String,
    #[serde(default)]
    pub image_data: String,
    pub level: String,
    pub attack: i64,
    pub defense: i64,
    pub max_health: i64,
    pub attack_speed: f64,
    pub critical_chance: i64,
    pub reward_exp: i64,
    pub reward_bits: i64,
}

// ── Database ─────────────────────────────────────────────────────────

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, AppError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| AppError::store("users", e))?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), AppError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                display_name TEXT,
                role TEXT NOT NULL DEFAULT 'user',
                bits INTEGER NOT NULL DEFAULT 0,
                manager_exp INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::store("users", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS animas (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                species TEXT NOT NULL,
                image_data TEXT NOT NULL DEFAULT '',
                level TEXT NOT NULL,
                attack INTEGER NOT NULL,
                defense INTEGER NOT NULL,
                max_health INTEGER NOT NULL,
                attack_speed REAL NOT NULL,
                critical_chance INTEGER NOT NULL,
                next_evolution_id INTEGER REFERENCES animas(id) ON DELETE SET NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::store("animas", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS enemies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                species TEXT NOT NULL,
                image_data TEXT NOT NULL DEFAULT '',
                level TEXT NOT NULL,
                attack INTEGER NOT NULL,
                defense INTEGER NOT NULL,
                max_health INTEGER NOT NULL,
                attack_speed REAL NOT NULL,
                critical_chance INTEGER NOT NULL,
                reward_exp INTEGER NOT NULL DEFAULT 0,
                reward_bits INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::store("enemies", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_animas (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                anima_id INTEGER NOT NULL REFERENCES animas(id),
                nickname TEXT,
                is_active INTEGER NOT NULL DEFAULT 0,
                current_exp INTEGER NOT NULL DEFAULT 0,
                attack_extra INTEGER NOT NULL DEFAULT 0,
                defense_extra INTEGER NOT NULL DEFAULT 0,
                max_health_extra INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::store("user_animas", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS activities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::store("activities", e))?;

        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        display_name: Option<&str>,
        role: &str,
    ) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (username, email, password_hash, display_name, role) \
             VALUES (?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(display_name)
        .bind(role)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::store("users", e))
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::store("users", e))
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::store("users", e))
    }

    pub async fn count_users(&self) -> Result<i64, AppError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::store("users", e))
    }

    pub async fn update_display_name(
        &self,
        id: i64,
        display_name: Option<&str>,
    ) -> Result<Option<User>, AppError> {
        let result = sqlx::query("UPDATE users SET display_name = ? WHERE id = ?")
            .bind(display_name)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::store("users", e))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_user(id).await
    }

    // ── Creature catalog ──────────────────────────────────────────────

    pub async fn list_animas(&self) -> Result<Vec<Anima>, AppError> {
        sqlx::query_as::<_, Anima>("SELECT * FROM animas ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::store("animas", e))
    }

    pub async fn list_animas_by_level(&self, level: &str) -> Result<Vec<Anima>, AppError> {
        sqlx::query_as::<_, Anima>(
            "SELECT * FROM animas WHERE level = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(level)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::store("animas", e))
    }

    pub async fn get_anima(&self, id: i64) -> Result<Option<Anima>, AppError> {
        sqlx::query_as::<_, Anima>("SELECT * FROM animas WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::store("animas", e))
    }

    pub async fn create_anima(&self, input: &AnimaInput) -> Result<Anima, AppError> {
        sqlx::query_as::<_, Anima>(
            "INSERT INTO animas (species, image_data, level, attack, defense, max_health, \
             attack_speed, critical_chance, next_evolution_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(&input.species)
        .bind(&input.image_data)
        .bind(&input.level)
        .bind(input.attack)
        .bind(input.defense)
        .bind(input.max_health)
        .bind(input.attack_speed)
        .bind(input.critical_chance)
        .bind(input.next_evolution_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::store("animas", e))
    }

    pub async fn update_anima(
        &self,
        id: i64,
        input: &AnimaInput,
    ) -> Result<Option<Anima>, AppError> {
        let result = sqlx::query(
            "UPDATE animas SET species = ?, image_data = ?, level = ?, attack = ?, \
             defense = ?, max_health = ?, attack_speed = ?, critical_chance = ?, \
             next_evolution_id = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(&input.species)
        .bind(&input.image_data)
        .bind(&input.level)
        .bind(input.attack)
        .bind(input.defense)
        .bind(input.max_health)
        .bind(input.attack_speed)
        .bind(input.critical_chance)
        .bind(input.next_evolution_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::store("animas", e))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_anima(id).await
    }

    /// Delete a creature species. Restricted while any owned instance still
    /// references it; evolution pointers to it are cleared by the schema.
    pub async fn delete_anima(&self, id: i64) -> Result<(), AppError> {
        let dependents: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM user_animas WHERE anima_id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::store("user_animas", e))?;
        if dependents > 0 {
            return Err(AppError::Conflict(format!(
                "species {id} still has {dependents} adopted instance(s)"
            )));
        }

        let result = sqlx::query("DELETE FROM animas WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::store("animas", e))?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("species {id} not found")));
        }
        Ok(())
    }

    // ── Adversary catalog ─────────────────────────────────────────────

    pub async fn list_enemies(&self) -> Result<Vec<Enemy>, AppError> {
        sqlx::query_as::<_, Enemy>("SELECT * FROM enemies ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::store("enemies", e))
    }

    pub async fn get_enemy(&self, id: i64) -> Result<Option<Enemy>, AppError> {
        sqlx::query_as::<_, Enemy>("SELECT * FROM enemies WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::store("enemies", e))
    }

    pub async fn create_enemy(&self, input: &EnemyInput) -> Result<Enemy, AppError> {
        sqlx::query_as::<_, Enemy>(
            "INSERT INTO enemies (species, image_data, level, attack, defense, max_health, \
             attack_speed, critical_chance, reward_exp, reward_bits) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(&input.species)
        .bind(&input.image_data)
        .bind(&input.level)
        .bind(input.attack)
        .bind(input.defense)
        .bind(input.max_health)
        .bind(input.attack_speed)
        .bind(input.critical_chance)
        .bind(input.reward_exp)
        .bind(input.reward_bits)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::store("enemies", e))
    }

    pub async fn update_enemy(
        &self,
        id: i64,
        input: &EnemyInput,
    ) -> Result<Option<Enemy>, AppError> {
        let result = sqlx::query(
            "UPDATE enemies SET species = ?, image_data = ?, level = ?, attack = ?, \
             defense = ?, max_health = ?, attack_speed = ?, critical_chance = ?, \
             reward_exp = ?, reward_bits = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(&input.species)
        .bind(&input.image_data)
        .bind(&input.level)
        .bind(input.attack)
        .bind(input.defense)
        .bind(input.max_health)
        .bind(input.attack_speed)
        .bind(input.critical_chance)
        .bind(input.reward_exp)
        .bind(input.reward_bits)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::store("enemies", e))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_enemy(id).await
    }

    pub async fn delete_enemy(&self, id: i64) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM enemies WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::store("enemies", e))?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("adversary {id} not found")));
        }
        Ok(())
    }

    // ── Owned instances ───────────────────────────────────────────────

    /// Active instance first, then insertion order.
    pub async fn list_user_animas(&self, user_id: i64) -> Result<Vec<UserAnima>, AppError> {
        sqlx::query_as::<_, UserAnima>(
            "SELECT * FROM user_animas WHERE user_id = ? ORDER BY is_active DESC, id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::store("user_animas", e))
    }

    pub async fn count_user_animas(&self, user_id: i64) -> Result<i64, AppError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM user_animas WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::store("user_animas", e))
    }

    pub async fn get_user_anima(
        &self,
        user_id: i64,
        id: i64,
    ) -> Result<Option<UserAnima>, AppError> {
        sqlx::query_as::<_, UserAnima>("SELECT * FROM user_animas WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::store("user_animas", e))
    }

    /// Adopt a species for a user. The bonus deltas are fixed here and never
    /// recomputed; the user's first-ever instance starts active, any later
    /// one starts inactive. Runs in one transaction so the existence check,
    /// the count and the insert observe the same state.
    pub async fn adopt_anima(
        &self,
        user_id: i64,
        anima_id: i64,
        nickname: Option<&str>,
        bonus: BonusStats,
    ) -> Result<UserAnima, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::store("user_animas", e))?;

        let species: Option<i64> = sqlx::query_scalar("SELECT id FROM animas WHERE id = ?")
            .bind(anima_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AppError::store("animas", e))?;
        if species.is_none() {
            return Err(AppError::Reference(format!(
                "species {anima_id} does not exist"
            )));
        }

        let owned: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_animas WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppError::store("user_animas", e))?;

        let instance = sqlx::query_as::<_, UserAnima>(
            "INSERT INTO user_animas (user_id, anima_id, nickname, is_active, current_exp, \
             attack_extra, defense_extra, max_health_extra) \
             VALUES (?, ?, ?, ?, 0, ?, ?, ?) RETURNING *",
        )
        .bind(user_id)
        .bind(anima_id)
        .bind(nickname)
        .bind(owned == 0)
        .bind(bonus.attack)
        .bind(bonus.defense)
        .bind(bonus.max_health)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::store("user_animas", e))?;

        tx.commit()
            .await
            .map_err(|e| AppError::store("user_animas", e))?;
        Ok(instance)
    }

    /// Make `id` the user's single active instance. Two steps — deactivate
    /// all, activate the target — in one transaction, so a reader never
    /// observes two active rows and a failed swap keeps the previous state.
    pub async fn set_active_anima(&self, user_id: i64, id: i64) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::store("user_animas", e))?;

        sqlx::query("UPDATE user_animas SET is_active = 0 WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::store("user_animas", e))?;

        let result = sqlx::query("UPDATE user_animas SET is_active = 1 WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::store("user_animas", e))?;

        if result.rows_affected() == 0 {
            // Dropping the transaction rolls the deactivation back.
            return Err(AppError::NotFound(format!("instance {id} not found")));
        }

        tx.commit()
            .await
            .map_err(|e| AppError::store("user_animas", e))
    }

    /// Delete an owned instance. Releasing the active instance leaves the
    /// user with zero active ones; no other instance is promoted.
    pub async fn release_anima(&self, user_id: i64, id: i64) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM user_animas WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::store("user_animas", e))?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("instance {id} not found")));
        }
        Ok(())
    }

    pub async fn set_nickname(
        &self,
        user_id: i64,
        id: i64,
        nickname: Option<&str>,
    ) -> Result<UserAnima, AppError> {
        let result = sqlx::query("UPDATE user_animas SET nickname = ? WHERE id = ? AND user_id = ?")
            .bind(nickname)
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::store("user_animas", e))?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("instance {id} not found")));
        }
        self.get_user_anima(user_id, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("instance {id} not found")))
    }

    /// Add experience to an instance. Amounts are validated positive by the
    /// caller, so the counter only ever grows.
    pub async fn add_experience(
        &self,
        user_id: i64,
        id: i64,
        amount: i64,
    ) -> Result<UserAnima, AppError> {
        let result = sqlx::query(
            "UPDATE user_animas SET current_exp = current_exp + ? WHERE id = ? AND user_id = ?",
        )
        .bind(amount)
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::store("user_animas", e))?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("instance {id} not found")));
        }
        self.get_user_anima(user_id, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("instance {id} not found")))
    }

    // ── Activity log ──────────────────────────────────────────────────

    pub async fn log_activity(
        &self,
        user_id: i64,
        kind: &str,
        message: &str,
    ) -> Result<(), AppError> {
        sqlx::query("INSERT INTO activities (user_id, kind, message) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(kind)
            .bind(message)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::store("activities", e))?;
        Ok(())
    }

    pub async fn recent_activities(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<Activity>, AppError> {
        sqlx::query_as::<_, Activity>(
            "SELECT * FROM activities WHERE user_id = ? \
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::store("activities", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::BonusStats;

    async fn test_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn rookie_input(species: &str) -> AnimaInput {
        AnimaInput {
            species: species.to_string(),
            image_data: String::new(),
            level: "Rookie".to_string(),
            attack: 20,
            defense: 10,
            max_health: 100,
            attack_speed: 1.2,
            critical_chance: 3,
            next_evolution_id: None,
        }
    }

    fn no_bonus() -> BonusStats {
        BonusStats {
            attack: 0,
            defense: 0,
            max_health: 0,
        }
    }

    async fn test_user(db: &Database, name: &str) -> User {
        db.create_user(name, &format!("{name}@example.com"), "hash", None, "user")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_anima_crud() {
        let db = test_db().await;

        let a = db.create_anima(&rookie_input("Pyromon")).await.unwrap();
        assert_eq!(a.species, "Pyromon");
        assert_eq!(a.level, "Rookie");

        let mut input = rookie_input("Pyromon");
        input.attack = 25;
        let updated = db.update_anima(a.id, &input).await.unwrap().unwrap();
        assert_eq!(updated.attack, 25);

        assert!(db.update_anima(999, &input).await.unwrap().is_none());

        let all = db.list_animas().await.unwrap();
        assert_eq!(all.len(), 1);

        db.delete_anima(a.id).await.unwrap();
        assert!(matches!(
            db.delete_anima(a.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(db.list_animas().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_by_level_empty_catalog() {
        let db = test_db().await;
        // Empty species table: the adoption screen gets an empty list.
        let rookies = db.list_animas_by_level("Rookie").await.unwrap();
        assert!(rookies.is_empty());
    }

    #[tokio::test]
    async fn test_first_adoption_is_active_second_is_not() {
        let db = test_db().await;
        let user = test_user(&db, "alice").await;
        let species = db.create_anima(&rookie_input("Pyromon")).await.unwrap();

        let first = db
            .adopt_anima(user.id, species.id, None, no_bonus())
            .await
            .unwrap();
        assert!(first.is_active);

        let second = db
            .adopt_anima(user.id, species.id, Some("Spark"), no_bonus())
            .await
            .unwrap();
        assert!(!second.is_active);
        assert_eq!(second.nickname.as_deref(), Some("Spark"));

        // The first instance's flag is untouched.
        let first_again = db.get_user_anima(user.id, first.id).await.unwrap().unwrap();
        assert!(first_again.is_active);
    }

    #[tokio::test]
    async fn test_adoption_is_per_user() {
        let db = test_db().await;
        let alice = test_user(&db, "alice").await;
        let bob = test_user(&db, "bob").await;
        let species = db.create_anima(&rookie_input("Pyromon")).await.unwrap();

        db.adopt_anima(alice.id, species.id, None, no_bonus())
            .await
            .unwrap();
        // Bob's first adoption is active even though Alice adopted earlier.
        let bobs = db
            .adopt_anima(bob.id, species.id, None, no_bonus())
            .await
            .unwrap();
        assert!(bobs.is_active);
    }

    #[tokio::test]
    async fn test_adopt_unknown_species_fails() {
        let db = test_db().await;
        let user = test_user(&db, "alice").await;

        let err = db
            .adopt_anima(user.id, 999, None, no_bonus())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Reference(_)));
        assert_eq!(db.count_user_animas(user.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_adoption_stores_bonus_deltas() {
        let db = test_db().await;
        let user = test_user(&db, "alice").await;
        let species = db.create_anima(&rookie_input("Pyromon")).await.unwrap();

        let bonus = BonusStats {
            attack: 7,
            defense: 3,
            max_health: 42,
        };
        let instance = db
            .adopt_anima(user.id, species.id, None, bonus)
            .await
            .unwrap();
        assert_eq!(instance.attack_extra, 7);
        assert_eq!(instance.defense_extra, 3);
        assert_eq!(instance.max_health_extra, 42);
        assert_eq!(instance.current_exp, 0);
    }

    #[tokio::test]
    async fn test_set_active_swaps_exclusively() {
        let db = test_db().await;
        let user = test_user(&db, "alice").await;
        let species = db.create_anima(&rookie_input("Pyromon")).await.unwrap();

        let first = db
            .adopt_anima(user.id, species.id, None, no_bonus())
            .await
            .unwrap();
        let second = db
            .adopt_anima(user.id, species.id, None, no_bonus())
            .await
            .unwrap();

        db.set_active_anima(user.id, second.id).await.unwrap();

        let owned = db.list_user_animas(user.id).await.unwrap();
        let active: Vec<_> = owned.iter().filter(|ua| ua.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
        assert!(!owned.iter().any(|ua| ua.id == first.id && ua.is_active));
    }

    #[tokio::test]
    async fn test_set_active_rejects_foreign_instance() {
        let db = test_db().await;
        let alice = test_user(&db, "alice").await;
        let bob = test_user(&db, "bob").await;
        let species = db.create_anima(&rookie_input("Pyromon")).await.unwrap();

        let alices = db
            .adopt_anima(alice.id, species.id, None, no_bonus())
            .await
            .unwrap();
        let bobs = db
            .adopt_anima(bob.id, species.id, None, no_bonus())
            .await
            .unwrap();

        let err = db.set_active_anima(bob.id, alices.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        // The failed swap rolled back: Bob's own instance is still active.
        let bobs_again = db.get_user_anima(bob.id, bobs.id).await.unwrap().unwrap();
        assert!(bobs_again.is_active);
    }

    #[tokio::test]
    async fn test_release_active_leaves_zero_active() {
        let db = test_db().await;
        let user = test_user(&db, "alice").await;
        let species = db.create_anima(&rookie_input("Pyromon")).await.unwrap();

        let first = db
            .adopt_anima(user.id, species.id, None, no_bonus())
            .await
            .unwrap();
        db.adopt_anima(user.id, species.id, None, no_bonus())
            .await
            .unwrap();

        db.release_anima(user.id, first.id).await.unwrap();

        // No automatic promotion of the remaining instance.
        let owned = db.list_user_animas(user.id).await.unwrap();
        assert_eq!(owned.len(), 1);
        assert!(owned.iter().all(|ua| !ua.is_active));

        let err = db.release_anima(user.id, first.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_species_restricted_while_adopted() {
        let db = test_db().await;
        let user = test_user(&db, "alice").await;
        let species = db.create_anima(&rookie_input("Pyromon")).await.unwrap();

        let instance = db
            .adopt_anima(user.id, species.id, None, no_bonus())
            .await
            .unwrap();

        let err = db.delete_anima(species.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // Once released, the species can go.
        db.release_anima(user.id, instance.id).await.unwrap();
        db.delete_anima(species.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_deleting_evolution_target_clears_pointer() {
        let db = test_db().await;
        let target = db.create_anima(&rookie_input("Pyromon")).await.unwrap();

        let mut input = rookie_input("Embermon");
        input.next_evolution_id = Some(target.id);
        let base = db.create_anima(&input).await.unwrap();
        assert_eq!(base.next_evolution_id, Some(target.id));

        db.delete_anima(target.id).await.unwrap();
        let base_again = db.get_anima(base.id).await.unwrap().unwrap();
        assert_eq!(base_again.next_evolution_id, None);
    }

    #[tokio::test]
    async fn test_experience_accumulates() {
        let db = test_db().await;
        let user = test_user(&db, "alice").await;
        let species = db.create_anima(&rookie_input("Pyromon")).await.unwrap();
        let instance = db
            .adopt_anima(user.id, species.id, None, no_bonus())
            .await
            .unwrap();

        let after = db.add_experience(user.id, instance.id, 30).await.unwrap();
        assert_eq!(after.current_exp, 30);
        let after = db.add_experience(user.id, instance.id, 12).await.unwrap();
        assert_eq!(after.current_exp, 42);
    }

    #[tokio::test]
    async fn test_nickname_update_and_clear() {
        let db = test_db().await;
        let user = test_user(&db, "alice").await;
        let species = db.create_anima(&rookie_input("Pyromon")).await.unwrap();
        let instance = db
            .adopt_anima(user.id, species.id, None, no_bonus())
            .await
            .unwrap();

        let named = db
            .set_nickname(user.id, instance.id, Some("Spark"))
            .await
            .unwrap();
        assert_eq!(named.nickname.as_deref(), Some("Spark"));

        let cleared = db.set_nickname(user.id, instance.id, None).await.unwrap();
        assert!(cleared.nickname.is_none());
    }

    #[tokio::test]
    async fn test_activity_feed_is_recent_first_and_capped() {
        let db = test_db().await;
        let user = test_user(&db, "alice").await;

        for i in 0..12 {
            db.log_activity(user.id, "action", &format!("event {i}"))
                .await
                .unwrap();
        }

        let feed = db.recent_activities(user.id, 10).await.unwrap();
        assert_eq!(feed.len(), 10);
        assert_eq!(feed[0].message, "event 11");
    }

    #[tokio::test]
    async fn test_dropped_table_surfaces_schema_missing() {
        let db = test_db().await;
        sqlx::query("DROP TABLE user_animas")
            .execute(&db.pool)
            .await
            .unwrap();

        let err = db.list_user_animas(1).await.unwrap_err();
        match err {
            AppError::SchemaMissing { table } => assert_eq!(table, "user_animas"),
            other => panic!("expected SchemaMissing, got {other:?}"),
        }
    }
}

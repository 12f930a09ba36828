// HTTP API routes (catalog CRUD, adoption, collection, dashboard).

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::auth::{AdminUser, AuthUser};
use crate::db::{Activity, Anima, AnimaInput, Database, Enemy, EnemyInput, UserAnima};
use crate::error::AppError;
use crate::insight::{insight_or_fallback, Insight, InsightProvider};
use crate::metrics;
use crate::stats::{
    self, AnimaLevel, AnimaStats, EffectiveStats, EnemyLevel, EnemyStats, RangeTable,
};

// Cap on the stored image payload: base64 of a 2 MiB image.
const MAX_IMAGE_BYTES: usize = 2 * 1024 * 1024 * 4 / 3;

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RollRequest {
    pub level: String,
}

#[derive(Deserialize)]
pub struct AdoptRequest {
    pub anima_id: i64,
    pub nickname: Option<String>,
}

#[derive(Deserialize)]
pub struct NicknameRequest {
    pub nickname: Option<String>,
}

#[derive(Deserialize)]
pub struct AddExperienceRequest {
    pub amount: i64,
}

// ── Response types ────────────────────────────────────────────────────

/// One-hop summary of a species' evolution target.
#[derive(Debug, serde::Serialize)]
pub struct EvolutionSummary {
    pub id: i64,
    pub species: String,
    pub image_data: String,
}

#[derive(Debug, serde::Serialize)]
pub struct AnimaWithEvolution {
    #[serde(flatten)]
    pub anima: Anima,
    pub next_evolution: Option<EvolutionSummary>,
}

/// An owned instance joined to its species, with displayed totals.
#[derive(Debug, serde::Serialize)]
pub struct CollectionEntry {
    #[serde(flatten)]
    pub instance: UserAnima,
    pub species: Anima,
    pub effective: EffectiveStats,
}

#[derive(Debug, serde::Serialize)]
pub struct DashboardSummary {
    pub bits: i64,
    pub manager_exp: i64,
    pub total_animas: i64,
    pub activities: Vec<Activity>,
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub ranges: Arc<RangeTable>,
    pub insight: Option<Arc<dyn InsightProvider>>,
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(db: Arc<Database>, insight: Option<Arc<dyn InsightProvider>>) -> Router {
    let state = AppState {
        db,
        ranges: Arc::new(RangeTable::default()),
        insight,
    };

    Router::new()
        // Creature catalog
        .route("/api/animas", get(list_animas).post(create_anima))
        .route("/api/animas/roll", post(roll_anima))
        .route(
            "/api/animas/{id}",
            get(get_anima).put(update_anima).delete(delete_anima),
        )
        // Adversary catalog
        .route("/api/enemies", get(list_enemies).post(create_enemy))
        .route("/api/enemies/roll", post(roll_enemy))
        .route(
            "/api/enemies/{id}",
            get(get_enemy).put(update_enemy).delete(delete_enemy),
        )
        // Adoption center
        .route("/api/adoption/animas", get(list_adoptable))
        // My collection
        .route("/api/collection", get(list_collection).post(adopt))
        .route("/api/collection/{id}", axum::routing::delete(release))
        .route("/api/collection/{id}/activate", put(activate))
        .route("/api/collection/{id}/nickname", put(rename))
        .route("/api/collection/{id}/exp", post(add_experience))
        // Dashboard
        .route("/api/dashboard/summary", get(dashboard_summary))
        .route("/api/dashboard/insight", get(dashboard_insight))
        .route("/api/activities", get(list_activities))
        .with_state(state)
}

// ── Validation ────────────────────────────────────────────────────────

fn validate_base_stats(
    species: &str,
    image_data: &str,
    max_health: i64,
    attack: i64,
    defense: i64,
    attack_speed: f64,
    critical_chance: i64,
) -> Result<(), AppError> {
    if species.trim().is_empty() {
        return Err(AppError::Validation("species name is required".to_string()));
    }
    if image_data.len() > MAX_IMAGE_BYTES {
        return Err(AppError::Validation(
            "image must be smaller than 2 MiB".to_string(),
        ));
    }
    if max_health <= 0 {
        return Err(AppError::Validation("max_health must be positive".to_string()));
    }
    if attack < 0 || defense < 0 {
        return Err(AppError::Validation(
            "attack and defense cannot be negative".to_string(),
        ));
    }
    if attack_speed <= 0.0 {
        return Err(AppError::Validation(
            "attack_speed must be positive".to_string(),
        ));
    }
    if !(0..=100).contains(&critical_chance) {
        return Err(AppError::Validation(
            "critical_chance must be between 0 and 100".to_string(),
        ));
    }
    Ok(())
}

async fn validate_anima_input(
    db: &Database,
    input: &AnimaInput,
    editing: Option<i64>,
) -> Result<(), AppError> {
    input
        .level
        .parse::<AnimaLevel>()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    validate_base_stats(
        &input.species,
        &input.image_data,
        input.max_health,
        input.attack,
        input.defense,
        input.attack_speed,
        input.critical_chance,
    )?;
    if let Some(evolution_id) = input.next_evolution_id {
        if editing == Some(evolution_id) {
            return Err(AppError::Validation(
                "a species cannot evolve into itself".to_string(),
            ));
        }
        if db.get_anima(evolution_id).await?.is_none() {
            return Err(AppError::Reference(format!(
                "evolution target {evolution_id} does not exist"
            )));
        }
    }
    Ok(())
}

fn validate_enemy_input(input: &EnemyInput) -> Result<(), AppError> {
    input
        .level
        .parse::<EnemyLevel>()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    validate_base_stats(
        &input.species,
        &input.image_data,
        input.max_health,
        input.attack,
        input.defense,
        input.attack_speed,
        input.critical_chance,
    )?;
    if input.reward_exp < 0 || input.reward_bits < 0 {
        return Err(AppError::Validation(
            "rewards cannot be negative".to_string(),
        ));
    }
    Ok(())
}

/// Resolve each species' evolution pointer against the already-loaded
/// catalog: one in-memory hop, so pointer cycles cannot cause traversal.
fn resolve_evolutions(animas: Vec<Anima>) -> Vec<AnimaWithEvolution> {
    let index: HashMap<i64, (String, String)> = animas
        .iter()
        .map(|a| (a.id, (a.species.clone(), a.image_data.clone())))
        .collect();

    animas
        .into_iter()
        .map(|anima| {
            let next_evolution = anima.next_evolution_id.and_then(|id| {
                index.get(&id).map(|(species, image_data)| EvolutionSummary {
                    id,
                    species: species.clone(),
                    image_data: image_data.clone(),
                })
            });
            AnimaWithEvolution {
                anima,
                next_evolution,
            }
        })
        .collect()
}

async fn log_activity(db: &Database, user_id: i64, kind: &str, message: &str) {
    if let Err(e) = db.log_activity(user_id, kind, message).await {
        tracing::warn!("Failed to log activity: {e}");
    }
}

// ── Creature catalog handlers ─────────────────────────────────────────

async fn list_animas(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<Vec<AnimaWithEvolution>>, AppError> {
    let animas = state.db.list_animas().await?;
    Ok(Json(resolve_evolutions(animas)))
}

async fn get_anima(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Anima>, AppError> {
    let anima = state
        .db
        .get_anima(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("species {id} not found")))?;
    Ok(Json(anima))
}

async fn create_anima(
    State(state): State<AppState>,
    admin: AdminUser,
    Json(input): Json<AnimaInput>,
) -> Result<(StatusCode, Json<Anima>), AppError> {
    validate_anima_input(&state.db, &input, None).await?;
    let anima = state.db.create_anima(&input).await?;
    log_activity(
        &state.db,
        admin.0.sub,
        "update",
        &format!("Created species {}", anima.species),
    )
    .await;
    Ok((StatusCode::CREATED, Json(anima)))
}

async fn update_anima(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<i64>,
    Json(input): Json<AnimaInput>,
) -> Result<Json<Anima>, AppError> {
    validate_anima_input(&state.db, &input, Some(id)).await?;
    let anima = state
        .db
        .update_anima(id, &input)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("species {id} not found")))?;
    log_activity(
        &state.db,
        admin.0.sub,
        "update",
        &format!("Updated species {}", anima.species),
    )
    .await;
    Ok(Json(anima))
}

async fn delete_anima(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.db.delete_anima(id).await?;
    log_activity(
        &state.db,
        admin.0.sub,
        "update",
        &format!("Deleted species {id}"),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

async fn roll_anima(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(req): Json<RollRequest>,
) -> Result<Json<AnimaStats>, AppError> {
    let level: AnimaLevel = req
        .level
        .parse()
        .map_err(|e: stats::RollError| AppError::Validation(e.to_string()))?;
    let rolled = stats::roll_anima_stats(&state.ranges, level, &mut rand::thread_rng())
        .map_err(|e| AppError::Validation(e.to_string()))?;
    metrics::STAT_ROLLS_TOTAL
        .with_label_values(&["anima", level.as_str()])
        .inc();
    Ok(Json(rolled))
}

// ── Adversary catalog handlers ────────────────────────────────────────

async fn list_enemies(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<Vec<Enemy>>, AppError> {
    Ok(Json(state.db.list_enemies().await?))
}

async fn get_enemy(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Enemy>, AppError> {
    let enemy = state
        .db
        .get_enemy(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("adversary {id} not found")))?;
    Ok(Json(enemy))
}

async fn create_enemy(
    State(state): State<AppState>,
    admin: AdminUser,
    Json(input): Json<EnemyInput>,
) -> Result<(StatusCode, Json<Enemy>), AppError> {
    validate_enemy_input(&input)?;
    let enemy = state.db.create_enemy(&input).await?;
    log_activity(
        &state.db,
        admin.0.sub,
        "update",
        &format!("Created adversary {}", enemy.species),
    )
    .await;
    Ok((StatusCode::CREATED, Json(enemy)))
}

async fn update_enemy(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<i64>,
    Json(input): Json<EnemyInput>,
) -> Result<Json<Enemy>, AppError> {
    validate_enemy_input(&input)?;
    let enemy = state
        .db
        .update_enemy(id, &input)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("adversary {id} not found")))?;
    log_activity(
        &state.db,
        admin.0.sub,
        "update",
        &format!("Updated adversary {}", enemy.species),
    )
    .await;
    Ok(Json(enemy))
}

async fn delete_enemy(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.db.delete_enemy(id).await?;
    log_activity(
        &state.db,
        admin.0.sub,
        "update",
        &format!("Deleted adversary {id}"),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

async fn roll_enemy(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(req): Json<RollRequest>,
) -> Result<Json<EnemyStats>, AppError> {
    let level: EnemyLevel = req
        .level
        .parse()
        .map_err(|e: stats::RollError| AppError::Validation(e.to_string()))?;
    let rolled = stats::roll_enemy_stats(&state.ranges, level, &mut rand::thread_rng())
        .map_err(|e| AppError::Validation(e.to_string()))?;
    metrics::STAT_ROLLS_TOTAL
        .with_label_values(&["enemy", level.as_str()])
        .inc();
    Ok(Json(rolled))
}

// ── Adoption & collection handlers ────────────────────────────────────

/// Only Rookie-tier species are adoptable. An empty catalog is an empty
/// list, not an error.
async fn list_adoptable(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<Vec<Anima>>, AppError> {
    let rookies = state
        .db
        .list_animas_by_level(AnimaLevel::Rookie.as_str())
        .await?;
    Ok(Json(rookies))
}

async fn list_collection(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<CollectionEntry>>, AppError> {
    let instances = state.db.list_user_animas(auth.0.sub).await?;
    let species: HashMap<i64, Anima> = state
        .db
        .list_animas()
        .await?
        .into_iter()
        .map(|a| (a.id, a))
        .collect();

    let entries = instances
        .into_iter()
        .filter_map(|instance| match species.get(&instance.anima_id) {
            Some(base) => {
                let effective = stats::effective_stats(base, &instance);
                Some(CollectionEntry {
                    instance,
                    species: base.clone(),
                    effective,
                })
            }
            None => {
                tracing::warn!(
                    "Instance {} references missing species {}",
                    instance.id,
                    instance.anima_id
                );
                None
            }
        })
        .collect();

    Ok(Json(entries))
}

async fn adopt(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<AdoptRequest>,
) -> Result<(StatusCode, Json<UserAnima>), AppError> {
    let bonus = stats::roll_bonus(&mut rand::thread_rng());
    let instance = state
        .db
        .adopt_anima(auth.0.sub, req.anima_id, req.nickname.as_deref(), bonus)
        .await?;
    metrics::ADOPTIONS_TOTAL.inc();

    // The adoption is already committed; a failed name lookup only
    // degrades the activity message.
    let species = state
        .db
        .get_anima(req.anima_id)
        .await
        .ok()
        .flatten()
        .map(|a| a.species)
        .unwrap_or_else(|| format!("species {}", req.anima_id));
    log_activity(
        &state.db,
        auth.0.sub,
        "action",
        &format!("Adopted {species}"),
    )
    .await;

    Ok((StatusCode::CREATED, Json(instance)))
}

async fn activate(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.db.set_active_anima(auth.0.sub, id).await?;
    metrics::ACTIVATIONS_TOTAL.inc();
    log_activity(
        &state.db,
        auth.0.sub,
        "action",
        &format!("Set instance {id} active"),
    )
    .await;
    Ok(Json(json!({ "active_id": id })))
}

async fn release(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.db.release_anima(auth.0.sub, id).await?;
    metrics::RELEASES_TOTAL.inc();
    log_activity(
        &state.db,
        auth.0.sub,
        "action",
        &format!("Released instance {id}"),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

async fn rename(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<NicknameRequest>,
) -> Result<Json<UserAnima>, AppError> {
    let instance = state
        .db
        .set_nickname(auth.0.sub, id, req.nickname.as_deref())
        .await?;
    Ok(Json(instance))
}

async fn add_experience(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<AddExperienceRequest>,
) -> Result<Json<UserAnima>, AppError> {
    if req.amount <= 0 {
        return Err(AppError::Validation(
            "experience amount must be positive".to_string(),
        ));
    }
    let instance = state.db.add_experience(auth.0.sub, id, req.amount).await?;
    Ok(Json(instance))
}

// ── Dashboard handlers ────────────────────────────────────────────────

async fn dashboard_summary(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<DashboardSummary>, AppError> {
    let user = state
        .db
        .get_user(auth.0.sub)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;
    let total_animas = state.db.count_user_animas(auth.0.sub).await?;
    let activities = state.db.recent_activities(auth.0.sub, 10).await?;

    Ok(Json(DashboardSummary {
        bits: user.bits,
        manager_exp: user.manager_exp,
        total_animas,
        activities,
    }))
}

/// The insight greeting is fetched separately from the summary so a slow
/// or failing provider never delays the dashboard's numbers.
async fn dashboard_insight(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Insight>, AppError> {
    let display_name = state
        .db
        .get_user(auth.0.sub)
        .await?
        .and_then(|u| u.display_name)
        .unwrap_or(auth.0.username);

    let insight = insight_or_fallback(state.insight.as_deref(), &display_name).await;
    let outcome = if insight.insight.is_some() {
        "generated"
    } else {
        "fallback"
    };
    metrics::INSIGHTS_TOTAL.with_label_values(&[outcome]).inc();

    Ok(Json(insight))
}

async fn list_activities(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Activity>>, AppError> {
    Ok(Json(state.db.recent_activities(auth.0.sub, 10).await?))
}

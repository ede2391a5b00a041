use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::api::dto::{
    ComposeRequest, ComposeResponse, HealthResponse, ImageRequest, ImageResponse, NarrativeRequest,
    NarrativeResponse, PersonaRequest, PersonaResponse, PromptRequest, PromptResponse,
    TraitsRequest, TraitsResponse,
};
use crate::api::error::{ApiError, ApiResult};
use crate::llm::image::{ImageProvider, ImageSize, RenderRequest, RenderStatus};
use crate::llm::media::{decode_image_payload, image_data_uri};
use crate::persona::{render_persona, seed_input, trait_sheet, DEFAULT_MODEL_VERSION};
use crate::prompt::build_prompt;
use crate::state::AppState;
use crate::traits::catalog::TraitCatalog;
use crate::traits::rules::{is_wallet_address, species_for_address, BackgroundName};
use crate::traits::select::LayerResult;
use crate::utils::hash::{canonical_json, keccak_hex, sha256_hex};
use crate::utils::timing::{start_request_timer, RequestTimer};

const FALLBACK_PIXEL_ERROR: &str = "provider_failed_fallback_pixel";

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn required_address(value: Option<&str>) -> ApiResult<String> {
    let address = non_empty(value).ok_or(ApiError::MissingField("address"))?;
    if !is_wallet_address(address) {
        return Err(ApiError::invalid(
            "address",
            "expected 0x followed by 40 hex digits",
        ));
    }
    Ok(address.to_lowercase())
}

fn model_version(value: Option<&str>) -> String {
    non_empty(value).unwrap_or(DEFAULT_MODEL_VERSION).to_string()
}

fn image_provider(value: Option<&str>, field: &'static str) -> ApiResult<Option<ImageProvider>> {
    non_empty(value)
        .map(|raw| {
            raw.parse::<ImageProvider>()
                .map_err(|err| ApiError::invalid(field, err.to_string()))
        })
        .transpose()
}

fn finish<T>(timer: &mut RequestTimer, result: ApiResult<T>) -> ApiResult<Json<T>> {
    if let Err(err) = &result {
        timer.mark_status("error", Some(err.code()));
    }
    result.map(Json)
}

pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        ts: Utc::now().to_rfc3339(),
        img_provider: state.renderer.default_provider(),
        llm_provider: state.narrator.provider_name(),
        default_style: state.registry.default_style().to_string(),
        styles: state.registry.style_names(),
    })
}

pub async fn traits(
    State(state): State<AppState>,
    payload: Result<Json<TraitsRequest>, JsonRejection>,
) -> ApiResult<Json<TraitsResponse>> {
    let Json(request) = payload?;
    let mut timer = start_request_timer("/api/traits", non_empty(request.address.as_deref()));
    let result = build_traits(&state, &request);
    finish(&mut timer, result)
}

fn build_traits(state: &AppState, request: &TraitsRequest) -> ApiResult<TraitsResponse> {
    let address = required_address(request.address.as_deref())?;
    let catalog = state.registry.get(request.style.as_deref())?;
    let version = model_version(request.model_version.as_deref());
    let sheet = trait_sheet(&catalog, &address, &request.metrics, &version);
    Ok(TraitsResponse {
        ok: true,
        style: catalog.style.clone(),
        style_version: catalog.version.clone(),
        species: sheet.species,
        names: sheet.names(),
        traits: sheet.traits.picks(),
        prompt: sheet.prompt,
        prompt_hash: sheet.prompt_hash,
    })
}

pub async fn prompt(
    State(state): State<AppState>,
    payload: Result<Json<PromptRequest>, JsonRejection>,
) -> ApiResult<Json<PromptResponse>> {
    let Json(request) = payload?;
    let mut timer = start_request_timer("/api/prompt", non_empty(request.address.as_deref()));
    let result = rebuild_prompt(&state, &request);
    finish(&mut timer, result)
}

fn rebuild_prompt(state: &AppState, request: &PromptRequest) -> ApiResult<PromptResponse> {
    let names = request
        .names
        .as_ref()
        .filter(|names| !names.is_empty())
        .ok_or(ApiError::MissingField("names"))?;
    let catalog = state.registry.get(request.style.as_deref())?;
    if let Some(unknown) = names.keys().find(|layer| catalog.layer(layer).is_none()) {
        return Err(ApiError::invalid("names", format!("unknown layer '{unknown}'")));
    }
    let traits = LayerResult::from_names(&catalog, names);
    let species = request
        .species
        .or_else(|| non_empty(request.address.as_deref()).map(species_for_address));
    Ok(PromptResponse {
        ok: true,
        style: catalog.style.clone(),
        prompt: build_prompt(&catalog, &traits, species),
    })
}

pub async fn image(
    State(state): State<AppState>,
    payload: Result<Json<ImageRequest>, JsonRejection>,
) -> ApiResult<Json<ImageResponse>> {
    let Json(request) = payload?;
    let mut timer = start_request_timer("/api/v1/image", None);
    let prompt = match non_empty(request.prompt.as_deref()) {
        Some(prompt) => prompt.to_string(),
        None => return finish(&mut timer, Err(ApiError::MissingField("prompt"))),
    };
    let provider = match image_provider(request.provider.as_deref(), "provider") {
        Ok(provider) => provider,
        Err(err) => return finish(&mut timer, Err(err)),
    };

    let result = state
        .renderer
        .render(RenderRequest {
            prompt,
            size: ImageSize::parse_or_default(request.size.as_deref()),
            provider,
            negative_prompt: request.negative_prompt,
            high_detail: request.high_detail.unwrap_or(false),
            seed_input: request.seed_input,
        })
        .await;

    let error = match &result.status {
        RenderStatus::Rendered => None,
        RenderStatus::Degraded { reason } => {
            timer.mark_status("degraded", Some(reason.clone()));
            Some(FALLBACK_PIXEL_ERROR.to_string())
        }
    };
    Ok(Json(ImageResponse {
        ok: error.is_none(),
        image_url: result.data_uri(),
        provider_used: result.provider_used,
        prompt_used: result.prompt_used,
        size: result.size,
        seed: result.seed,
        error,
    }))
}

pub async fn narrative(
    State(state): State<AppState>,
    payload: Result<Json<NarrativeRequest>, JsonRejection>,
) -> ApiResult<Json<NarrativeResponse>> {
    let Json(request) = payload?;
    let mut timer = start_request_timer("/api/narrative", None);
    let payload = match serde_json::to_value(&request) {
        Ok(payload) => payload,
        Err(err) => return finish(&mut timer, Err(ApiError::Internal(err.to_string()))),
    };
    let seed = keccak_hex(&canonical_json(&json!({
        "kind": "narrative_v1",
        "payload": payload,
    })));

    let outcome = state.narrator.generate(&payload).await;
    if let Some(error) = &outcome.meta.error {
        timer.mark_status("fallback", Some(error.clone()));
    }
    Ok(Json(NarrativeResponse {
        ok: true,
        narrative_json: outcome.narrative,
        seed,
        meta: outcome.meta,
    }))
}

pub async fn compose(
    State(state): State<AppState>,
    payload: Result<Json<ComposeRequest>, JsonRejection>,
) -> ApiResult<Json<ComposeResponse>> {
    let Json(request) = payload?;
    let mut timer = start_request_timer("/api/compose", None);
    let (subject, background, catalog) = match compose_inputs(&state, &request) {
        Ok(prepared) => prepared,
        Err(err) => return finish(&mut timer, Err(err)),
    };

    let compositor = state.compositor.clone();
    let joined = tokio::task::spawn_blocking(move || {
        compositor.composite(&subject, background, &catalog.postprocess)
    })
    .await;
    let result = match joined {
        Ok(composed) => composed.map_err(ApiError::from).map(|composed| ComposeResponse {
            ok: true,
            image_url: image_data_uri(&composed.png),
            width: composed.width,
            height: composed.height,
        }),
        Err(err) => Err(ApiError::Internal(format!("compositor task failed: {err}"))),
    };
    finish(&mut timer, result)
}

fn compose_inputs(
    state: &AppState,
    request: &ComposeRequest,
) -> ApiResult<(Vec<u8>, BackgroundName, Arc<TraitCatalog>)> {
    let subject = non_empty(request.subject_image.as_deref())
        .ok_or(ApiError::MissingField("subjectImage"))?;
    let background_label = non_empty(request.background_name.as_deref())
        .ok_or(ApiError::MissingField("backgroundName"))?;
    let background = BackgroundName::from_label(background_label).ok_or_else(|| {
        ApiError::invalid(
            "backgroundName",
            format!("expected one of: {}", BackgroundName::ALL.map(BackgroundName::label).join(", ")),
        )
    })?;
    let subject = decode_image_payload(subject)
        .ok_or_else(|| ApiError::invalid("subjectImage", "not a data URI or base64 image"))?;
    let catalog = state.registry.get(request.style.as_deref())?;
    Ok((subject, background, catalog))
}

pub async fn persona(
    State(state): State<AppState>,
    payload: Result<Json<PersonaRequest>, JsonRejection>,
) -> ApiResult<Json<PersonaResponse>> {
    let Json(request) = payload?;
    let mut timer = start_request_timer("/api/persona", non_empty(request.address.as_deref()));
    let result = run_persona(&state, request, &mut timer).await;
    finish(&mut timer, result)
}

async fn run_persona(
    state: &AppState,
    request: PersonaRequest,
    timer: &mut RequestTimer,
) -> ApiResult<PersonaResponse> {
    let address = required_address(request.address.as_deref())?;
    let provider = image_provider(request.img_provider.as_deref(), "imgProvider")?;
    let catalog = state.registry.get(request.style.as_deref())?;
    let version = model_version(request.model_version.as_deref());

    let sheet = trait_sheet(&catalog, &address, &request.metrics, &version);
    let names = sheet.names();
    let id = keccak_hex(&canonical_json(&json!({
        "address": address,
        "modelVersion": version,
        "promptHash": sheet.prompt_hash,
    })));

    let narrative_payload = json!({
        "persona": request.persona,
        "traits": names,
        "analytics": request.metrics,
    });
    let narrative = state.narrator.generate(&narrative_payload).await;

    let mut response = PersonaResponse {
        ok: true,
        id,
        address: address.clone(),
        model_version: version.clone(),
        style: catalog.style.clone(),
        trait_names: names,
        prompt: sheet.prompt.clone(),
        prompt_hash: sheet.prompt_hash.clone(),
        narrative: narrative.narrative,
        narrative_meta: narrative.meta,
        image_url: None,
        image_sha256: None,
        render_ok: None,
        provider_used: None,
        error: None,
    };
    if request.dry_run {
        info!("Dry run for {}; skipping render", address);
        return Ok(response);
    }

    let image = render_persona(
        state,
        catalog.clone(),
        &sheet,
        seed_input(&address, &version),
        provider,
    )
    .await
    .map_err(|err| ApiError::Internal(err.to_string()))?;

    response.provider_used = Some(image.render.provider_used);
    match image.composed {
        Some(composed) => {
            response.image_url = Some(image_data_uri(&composed.png));
            response.image_sha256 = Some(sha256_hex(&composed.png));
            response.render_ok = Some(true);
        }
        None => {
            if let RenderStatus::Degraded { reason } = &image.render.status {
                warn!("Persona render for {} degraded: {}", address, reason);
                timer.mark_status("degraded", Some(reason.clone()));
            }
            response.image_sha256 = image.render.image_bytes().map(|bytes| sha256_hex(&bytes));
            response.image_url = Some(image.render.data_uri());
            response.render_ok = Some(false);
            response.ok = false;
            response.error = Some(FALLBACK_PIXEL_ERROR.to_string());
        }
    }
    Ok(response)
}

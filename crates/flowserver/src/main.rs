use actix_cors::Cors;
use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult};
use actix_ws::Message;
use flowcore::{ExecutionId, FlowError, NodeId, WorkflowDefinition};
use flownodes::{standard_registry, OpenAiProvider, StandardActionProvider};
use flowruntime::{FlowRuntime, RunOptions, RuntimeConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Application state shared across handlers
struct AppState {
    runtime: Arc<FlowRuntime>,
}

/// Request body for starting an execution
#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    workflow: WorkflowDefinition,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    user_id: Option<Uuid>,
    #[serde(default)]
    trigger_node: Option<NodeId>,
    /// Run to completion and answer with the final report
    #[serde(default)]
    wait: bool,
}

#[derive(Debug, Serialize)]
struct ExecutionAccepted {
    execution_id: ExecutionId,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(e: &FlowError) -> HttpResponse {
    let body = ErrorResponse {
        error: e.to_string(),
    };
    match e {
        FlowError::Graph(_) => HttpResponse::UnprocessableEntity().json(body),
        FlowError::ExecutionNotFound(_) => HttpResponse::NotFound().json(body),
        _ => {
            error!("Request failed: {}", e);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "flowengine"
    }))
}

/// Start a run of the submitted workflow
#[post("/api/executions")]
async fn start_execution(
    data: web::Data<AppState>,
    req: web::Json<ExecuteRequest>,
) -> ActixResult<impl Responder> {
    let req = req.into_inner();
    let options = RunOptions {
        user_id: req.user_id,
        trigger_node: req.trigger_node,
        execution_id: None,
    };

    info!(
        "Starting workflow {} ({}) with {} nodes",
        req.workflow.name,
        req.workflow.id,
        req.workflow.nodes.len()
    );

    if req.wait {
        return Ok(
            match data
                .runtime
                .run_workflow_blocking(req.workflow, req.payload, options)
                .await
            {
                Ok(report) => HttpResponse::Ok().json(report),
                Err(e) => error_response(&e),
            },
        );
    }

    Ok(
        match data
            .runtime
            .run_workflow(req.workflow, req.payload, options)
            .await
        {
            Ok(execution_id) => HttpResponse::Accepted().json(ExecutionAccepted { execution_id }),
            Err(e) => error_response(&e),
        },
    )
}

/// List executions still in flight
#[get("/api/executions")]
async fn list_active(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    Ok(HttpResponse::Ok().json(data.runtime.active_executions().await))
}

/// Current status report of an execution
#[get("/api/executions/{id}")]
async fn get_execution(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    Ok(match data.runtime.get_execution_status(path.into_inner()).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => error_response(&e),
    })
}

/// Request cancellation of a running execution
#[post("/api/executions/{id}/cancel")]
async fn cancel_execution(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    let execution_id = path.into_inner();
    Ok(match data.runtime.cancel(execution_id).await {
        Ok(true) => HttpResponse::Accepted().json(serde_json::json!({ "cancelled": true })),
        Ok(false) => {
            warn!("Cancel requested for finished execution {}", execution_id);
            HttpResponse::Conflict().json(serde_json::json!({
                "cancelled": false,
                "error": "Execution already finished"
            }))
        }
        Err(e) => error_response(&e),
    })
}

/// WebSocket endpoint for real-time events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagged, {} events dropped", skipped);
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// List available node kinds
#[get("/api/nodes")]
async fn list_node_kinds(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.runtime.registry();
    let nodes: Vec<_> = registry
        .list_node_kinds()
        .into_iter()
        .filter_map(|kind| registry.get_metadata(kind))
        .collect();

    Ok(HttpResponse::Ok().json(nodes))
}

fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(start_execution)
        .service(list_active)
        .service(get_execution)
        .service(cancel_execution)
        .service(websocket_events)
        .service(list_node_kinds);
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Starting Flow Engine Server");

    let registry = standard_registry(
        Arc::new(OpenAiProvider::from_env()),
        Arc::new(StandardActionProvider::new()),
    );
    let config = match std::env::var("FLOW_CONFIG") {
        Ok(path) => RuntimeConfig::from_file(&path)?,
        Err(_) => RuntimeConfig::default(),
    };
    let runtime = FlowRuntime::with_config(registry, config);

    info!("✅ Runtime initialized with standard nodes");

    let app_state = web::Data::new(AppState {
        runtime: Arc::new(runtime),
    });

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(configure)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test};
    use flowcore::{ExecutionStatus, NodeSpec};
    use serde_json::json;

    fn state() -> web::Data<AppState> {
        let registry = standard_registry(
            Arc::new(OpenAiProvider::new("http://127.0.0.1:9", None)),
            Arc::new(StandardActionProvider::new()),
        );
        web::Data::new(AppState {
            runtime: Arc::new(FlowRuntime::new(registry)),
        })
    }

    fn log_workflow() -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new("log only");
        def.add_node(NodeSpec::trigger("t"));
        def.add_node(
            NodeSpec::action("log")
                .with_config("actionType", "log")
                .with_config("actionConfig", json!({"message": "hello"})),
        );
        def.connect("t", flowcore::ports::OUTPUT, "log");
        def
    }

    #[actix_web::test]
    async fn test_wait_returns_final_report() {
        let app = test::init_service(App::new().app_data(state()).configure(configure)).await;
        let req = test::TestRequest::post()
            .uri("/api/executions")
            .set_json(json!({ "workflow": log_workflow(), "payload": {"n": 1}, "wait": true }))
            .to_request();
        let report: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(report["status"], json!(ExecutionStatus::Completed));
        assert_eq!(report["perNodeResults"]["log"]["status"], json!("succeeded"));
    }

    #[actix_web::test]
    async fn test_invalid_graph_is_unprocessable() {
        let app = test::init_service(App::new().app_data(state()).configure(configure)).await;
        let mut def = log_workflow();
        def.connect("t", flowcore::ports::OUTPUT, "ghost");
        let req = test::TestRequest::post()
            .uri("/api/executions")
            .set_json(json!({ "workflow": def }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_web::test]
    async fn test_unknown_execution_is_not_found() {
        let app = test::init_service(App::new().app_data(state()).configure(configure)).await;
        let req = test::TestRequest::get()
            .uri(&format!("/api/executions/{}", Uuid::new_v4()))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}

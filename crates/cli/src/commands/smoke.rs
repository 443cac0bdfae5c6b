//! End-to-end smoke pass: drives a complete order lifecycle through the
//! coordinator against the in-process order service, so a release build can
//! be sanity-checked without a reachable backend.

use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::commands::CommandResult;
use prodflow_coordinator::{BaseFieldPatch, Coordinator, RecordingLocationProvider, StepDraft};
use prodflow_core::domain::order::{FinalizationData, OrderId, OrderStatus};
use prodflow_core::errors::CoordinatorError;
use prodflow_core::lifecycle::OrderEvent;
use prodflow_remote::InMemoryOrderService;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "draft_setup",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to initialize async runtime: {error}"),
            });
            checks.push(skipped("persist_and_rekey"));
            checks.push(skipped("production_run"));
            checks.push(skipped("finalization"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let service = Arc::new(InMemoryOrderService::new());
    let location = Arc::new(RecordingLocationProvider::default());
    let coordinator = Coordinator::new("/production-orders", service, location);

    let stage_started = Instant::now();
    let draft_id = match runtime.block_on(draft_setup(&coordinator)) {
        Ok(draft_id) => {
            checks.push(SmokeCheck {
                name: "draft_setup",
                status: SmokeStatus::Pass,
                elapsed_ms: stage_started.elapsed().as_millis() as u64,
                message: format!("draft {draft_id} configured with two steps"),
            });
            draft_id
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "draft_setup",
                status: SmokeStatus::Fail,
                elapsed_ms: stage_started.elapsed().as_millis() as u64,
                message: error.to_string(),
            });
            checks.push(skipped("persist_and_rekey"));
            checks.push(skipped("production_run"));
            checks.push(skipped("finalization"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let stage_started = Instant::now();
    let order_id = match runtime.block_on(coordinator.save(&draft_id)) {
        Ok(order_id) => {
            checks.push(SmokeCheck {
                name: "persist_and_rekey",
                status: SmokeStatus::Pass,
                elapsed_ms: stage_started.elapsed().as_millis() as u64,
                message: format!("draft persisted as order {order_id}"),
            });
            order_id
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "persist_and_rekey",
                status: SmokeStatus::Fail,
                elapsed_ms: stage_started.elapsed().as_millis() as u64,
                message: error.to_string(),
            });
            checks.push(skipped("production_run"));
            checks.push(skipped("finalization"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let stage_started = Instant::now();
    match runtime.block_on(production_run(&coordinator, &order_id)) {
        Ok(()) => checks.push(SmokeCheck {
            name: "production_run",
            status: SmokeStatus::Pass,
            elapsed_ms: stage_started.elapsed().as_millis() as u64,
            message: "both steps started and completed".to_string(),
        }),
        Err(error) => {
            checks.push(SmokeCheck {
                name: "production_run",
                status: SmokeStatus::Fail,
                elapsed_ms: stage_started.elapsed().as_millis() as u64,
                message: error.to_string(),
            });
            checks.push(skipped("finalization"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    }

    let stage_started = Instant::now();
    match runtime.block_on(finalization(&coordinator, &order_id)) {
        Ok(()) => checks.push(SmokeCheck {
            name: "finalization",
            status: SmokeStatus::Pass,
            elapsed_ms: stage_started.elapsed().as_millis() as u64,
            message: format!("order {order_id} completed"),
        }),
        Err(error) => checks.push(SmokeCheck {
            name: "finalization",
            status: SmokeStatus::Fail,
            elapsed_ms: stage_started.elapsed().as_millis() as u64,
            message: error.to_string(),
        }),
    }

    finalize_report(checks, started.elapsed().as_millis() as u64)
}

async fn draft_setup(coordinator: &Coordinator) -> Result<OrderId, CoordinatorError> {
    let draft_id = coordinator.new_draft();
    coordinator
        .update_base_field(&draft_id, BaseFieldPatch::Product(Some("smoke-product".to_owned())))?;
    coordinator
        .update_base_field(&draft_id, BaseFieldPatch::TargetQuantity(Some(Decimal::new(10, 0))))?;
    coordinator.configure_steps(
        &draft_id,
        vec![
            StepDraft {
                process_order: 1,
                process_name: "Cutting".to_owned(),
                process_description: String::new(),
            },
            StepDraft {
                process_order: 2,
                process_name: "Assembly".to_owned(),
                process_description: String::new(),
            },
        ],
    )?;
    coordinator.apply_order_event(&draft_id, OrderEvent::SaveSetup).await?;
    Ok(draft_id)
}

async fn production_run(
    coordinator: &Coordinator,
    order_id: &OrderId,
) -> Result<(), CoordinatorError> {
    coordinator.apply_order_event(order_id, OrderEvent::ValidateSetup).await?;
    coordinator.apply_order_event(order_id, OrderEvent::StartProduction).await?;

    let total = coordinator
        .record(order_id)
        .map(|record| record.steps.len())
        .ok_or_else(|| CoordinatorError::UnknownOrder(order_id.clone()))?;
    for index in 0..total {
        coordinator.assign_worker(order_id, index, Some("smoke-worker".to_owned()))?;
        coordinator.start_step(order_id, index).await?;
        coordinator.complete_step(order_id, index).await?;
    }
    Ok(())
}

async fn finalization(
    coordinator: &Coordinator,
    order_id: &OrderId,
) -> Result<(), CoordinatorError> {
    coordinator
        .finalize(
            order_id,
            FinalizationData { produced_quantity: Decimal::new(10, 0), observations: None },
        )
        .await?;

    let status = coordinator.record(order_id).map(|record| record.status);
    if status != Some(OrderStatus::Completed) {
        return Err(CoordinatorError::Transport(format!(
            "expected a completed order after finalization, found {status:?}"
        )));
    }
    Ok(())
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}

// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{Orchestrator, OrchestratorError, RuntimeRegistry};
use assert_matches::assert_matches;
use runpad_base::{
    language::{HostKey, Language},
    surface::DrawingSurface,
};
use runpad_execution::test_utils::{
    MockInstantiatorFactory, MockInterpreterFactory, MockToolchainFactory,
};

fn full_registry() -> RuntimeRegistry {
    RuntimeRegistry::new()
        .with_interpreter(HostKey::Python, MockInterpreterFactory::new())
        .with_compiler(
            HostKey::Cpp,
            MockToolchainFactory::new(),
            MockInstantiatorFactory::new(),
        )
}

#[test_log::test(tokio::test)]
async fn unregistered_hosts_are_rejected() {
    let orchestrator = Orchestrator::new(RuntimeRegistry::new());

    assert_matches!(
        orchestrator.get_runtime(Language::Python).await,
        Err(OrchestratorError::UnregisteredHost(HostKey::Python))
    );
}

#[test]
fn input_needs_an_existing_runtime() {
    let orchestrator = Orchestrator::new(full_registry());

    assert_matches!(
        orchestrator.submit_input(Language::Python, "hello"),
        Err(OrchestratorError::NoRuntime(Language::Python))
    );
}

#[test]
fn destroying_a_missing_runtime_is_harmless() {
    let orchestrator = Orchestrator::new(full_registry());

    orchestrator.destroy_runtime(Language::Python);
    orchestrator.destroy_runtime(Language::Cpp);
    orchestrator.shutdown();
}

#[test]
fn surface_transfer_is_limited_to_canvas_languages() {
    let orchestrator = Orchestrator::new(full_registry());
    let (surface, _frames) = DrawingSurface::new(64, 64);

    assert_matches!(
        orchestrator.install_surface(Language::Python, surface),
        Err(OrchestratorError::NotCanvasLanguage(Language::Python))
    );
}

#[test]
fn surface_transfer_needs_an_existing_runtime() {
    let orchestrator = Orchestrator::new(full_registry());
    let (surface, _frames) = DrawingSurface::new(64, 64);

    assert_matches!(
        orchestrator.install_surface(Language::Cpp, surface),
        Err(OrchestratorError::NoRuntime(Language::Cpp))
    );
}

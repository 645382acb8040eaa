//! Unit tests for the code-generator facade.

use std::sync::Arc;

use agent_accord::codegen::{protocol_hash, CodeGenerator, LlmCodeGenerator};
use agent_accord::protocol::Role;
use agent_accord::test_support::ScriptedLlm;
use agent_accord::AppError;

const PROTOCOL_DOC: &str = "# Requirements\nEcho text back.\n";

#[test]
fn protocol_hash_is_stable_and_short() {
    let first = protocol_hash(PROTOCOL_DOC);
    let second = protocol_hash(PROTOCOL_DOC);

    assert_eq!(first, second, "same document, same hash");
    assert_eq!(first.len(), 16, "8 bytes of sha-256 as hex");
    assert_ne!(first, protocol_hash("# Requirements\nSomething else.\n"));
}

#[tokio::test]
async fn generator_writes_module_and_document() {
    let dir = tempfile::tempdir().expect("tempdir");
    let llm = Arc::new(
        ScriptedLlm::new().reply("Here is the module:\n```python\nimport logging\n\nclass EchoRequester:\n    pass\n```"),
    );
    let generator = LlmCodeGenerator::new(llm);

    let module_path = generator
        .generate(PROTOCOL_DOC, Role::Requester, dir.path())
        .await
        .expect("generation must succeed");

    let hash = protocol_hash(PROTOCOL_DOC);
    assert_eq!(module_path, dir.path().join(format!("{hash}.py")));

    let source = std::fs::read_to_string(&module_path).expect("module must exist");
    assert!(source.contains("class EchoRequester"), "{source}");

    let doc = std::fs::read_to_string(dir.path().join(format!("{hash}.md")))
        .expect("protocol document must be written alongside");
    assert_eq!(doc, PROTOCOL_DOC);
}

#[tokio::test]
async fn missing_python_block_is_a_codegen_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let llm = Arc::new(ScriptedLlm::new().reply("Sorry, I cannot produce code for this."));
    let generator = LlmCodeGenerator::new(llm);

    let err = generator
        .generate(PROTOCOL_DOC, Role::Provider, dir.path())
        .await
        .expect_err("prose output must fail");
    assert!(matches!(err, AppError::Codegen(_)), "got {err:?}");
}

#[tokio::test]
async fn llm_failure_maps_to_a_codegen_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let generator = LlmCodeGenerator::new(Arc::new(ScriptedLlm::new()));

    let err = generator
        .generate(PROTOCOL_DOC, Role::Provider, dir.path())
        .await
        .expect_err("exhausted script must fail");
    assert!(matches!(err, AppError::Codegen(_)), "got {err:?}");
}

#[tokio::test]
async fn regeneration_overwrites_the_same_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let llm = Arc::new(
        ScriptedLlm::new()
            .reply("```python\n# first\n```")
            .reply("```python\n# second\n```"),
    );
    let generator = LlmCodeGenerator::new(llm);

    let first = generator
        .generate(PROTOCOL_DOC, Role::Requester, dir.path())
        .await
        .expect("first generation");
    let second = generator
        .generate(PROTOCOL_DOC, Role::Requester, dir.path())
        .await
        .expect("second generation");

    assert_eq!(first, second, "stable naming per protocol document");
    let source = std::fs::read_to_string(second).expect("module must exist");
    assert_eq!(source, "# second");
}

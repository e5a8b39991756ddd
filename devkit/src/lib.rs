/*!
# HealthWatch DevKit - Stubs et Utilitaires de test

Bibliothèque facilitant les tests du kernel HealthWatch avec:
- Stub HTTP /ping pour tester les collecteurs sans ClickHouse
- Builders YAML pour clusters et règles d'alerte
- Harness avec répertoire temporaire isolé
*/

pub mod fixtures;
pub mod ping_stub;
pub mod test_utils;

pub use fixtures::{clusters_yaml, rules_yaml, ClusterFixture, NodeFixture, RuleFixture};
pub use ping_stub::{closed_port, PingStub, StubBehavior};
pub use test_utils::TestHarness;

mod common;

use common::{checkpoint_yaml, vae_yaml, write_manifest};
use mods_registry::config::Config;
use mods_registry::index::{IndexCompiler, Status};
use mods_registry::manifest::ManifestFile;
use mods_registry::validate::{Rule, Severity, Validator};
use mods_registry::RegistryError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

const HASH: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

fn compiler(strict: bool) -> IndexCompiler {
    IndexCompiler::new(&Config::default()).unwrap().strict(strict)
}

fn validator() -> Validator {
    Validator::new(&Config::default().validation).unwrap()
}

fn sample_set(root: &std::path::Path) -> Vec<ManifestFile> {
    vec![
        write_manifest(
            root,
            "vae/flux-ae.yaml",
            &vae_yaml("flux-ae", "https://cdn.example.com/ae.safetensors", HASH, 335),
        ),
        write_manifest(
            root,
            "checkpoints/sdxl-base.yaml",
            &checkpoint_yaml("sdxl-base", "https://cdn.example.com/sdxl.safetensors", HASH, 6_938),
        ),
        write_manifest(
            root,
            "loras/detail-tweaker.yaml",
            &format!(
                "id: detail-tweaker\nname: Detail Tweaker\ntype: lora\ncategory: style\ncloud_available: true\nbase_models: [sdxl-base]\nfile:\n  url: https://cdn.example.com/detail.safetensors\n  sha256: {HASH}\n  size: 144\n"
            ),
        ),
    ]
}

#[test]
fn test_compile_is_deterministic() {
    let temp_dir = TempDir::new().unwrap();
    let files = sample_set(temp_dir.path());

    let (first, _) = compiler(false).compile(&files).unwrap();
    let (second, _) = compiler(false).compile(&files).unwrap();

    assert_eq!(first.items, second.items);
    assert_eq!(first.type_counts, second.type_counts);
    assert_eq!(first.total_count, second.total_count);
    assert_eq!(first.total_count, 3);
    assert_eq!(first.cloud_available_count, 1);
}

#[test]
fn test_one_bad_manifest_blocks_the_index() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();

    let mut files: Vec<ManifestFile> = (0..9)
        .map(|i| {
            let id = format!("vae-{i}");
            write_manifest(
                root,
                &format!("vae/{id}.yaml"),
                &vae_yaml(&id, "https://cdn.example.com/v.safetensors", HASH, 10),
            )
        })
        .collect();
    files.push(write_manifest(
        root,
        "vae/broken.yaml",
        "id: broken\nname: Broken\ntype: vae\n",
    ));

    let output = root.join("index.json");
    let err = compiler(false).build(&files, &output).unwrap_err();

    let RegistryError::CompilationBlocked(report) = err else {
        panic!("expected blocked compilation");
    };
    assert!(!output.exists());
    assert_eq!(report.total(), 10);
    assert_eq!(report.failing_count(), 1);
    for file in &files {
        let status = report.get(&file.path).expect("every manifest is reported");
        let expected = if file.stem() == "broken" {
            Status::Errors
        } else {
            Status::Ok
        };
        assert_eq!(status.status(), expected, "{}", file.path.display());
    }
}

#[test]
fn test_placeholder_hash_lenient_and_strict() {
    let temp_dir = TempDir::new().unwrap();
    let files = vec![write_manifest(
        temp_dir.path(),
        "checkpoints/flux-dev.yaml",
        &checkpoint_yaml("flux-dev", "https://cdn.example.com/flux.safetensors", "VERIFY_abc", 100),
    )];

    assert!(validator().validate_file(&files[0]).is_valid());

    let (index, report) = compiler(false).compile(&files).unwrap();
    assert_eq!(index.total_count, 1);
    let violations = &report.manifests[0].violations;
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule, Rule::HashUnresolved);
    assert_eq!(violations[0].severity, Severity::Warning);
    assert_eq!(violations[0].path, "variants[0].sha256");

    let err = compiler(true).compile(&files).unwrap_err();
    let RegistryError::CompilationBlocked(report) = err else {
        panic!("expected blocked compilation");
    };
    let violation = &report.manifests[0].violations[0];
    assert_eq!(violation.rule, Rule::HashUnresolved);
    assert_eq!(violation.severity, Severity::Error);
}

#[test]
fn test_recipe_with_file_block_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_manifest(
        temp_dir.path(),
        "recipes/portrait.yaml",
        &format!(
            "id: portrait\nname: Portrait\ntype: recipe\nrecipe:\n  base_model: flux-dev\n  training:\n    steps: 1000\nfile:\n  url: https://cdn.example.com/p.safetensors\n  sha256: {HASH}\n  size: 1\n"
        ),
    );

    let validation = validator().validate_file(&file);
    assert!(!validation.is_valid());
    assert!(validation.manifest.is_none());
    assert!(validation.errors().any(|v| v.rule == Rule::PayloadShape));
}

#[test]
fn test_type_directory_mismatch() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_manifest(
        temp_dir.path(),
        "loras/flux-ae.yaml",
        &vae_yaml("flux-ae", "https://cdn.example.com/ae.safetensors", HASH, 335),
    );

    let validation = validator().validate_file(&file);
    assert_eq!(
        validation.errors().map(|v| v.rule).collect::<Vec<_>>(),
        vec![Rule::TypeDirectoryMismatch]
    );
}

/// Payload blocks a generated manifest carries
#[derive(Debug, Clone, Copy)]
struct Shape {
    file: bool,
    variants: bool,
    stem_matches: bool,
}

fn generated(rng: &mut StdRng, id: &str, shape: Shape) -> String {
    let kind = ["checkpoint", "vae", "upscaler", "text_encoder"][rng.gen_range(0..4)];
    let mut yaml = format!("id: {id}\nname: Generated {id}\ntype: {kind}\n");
    if rng.gen_bool(0.5) {
        yaml.push_str("cloud_available: true\n");
    }
    if shape.file {
        yaml.push_str(&format!(
            "file:\n  url: https://cdn.example.com/{id}.bin\n  sha256: {HASH}\n  size: {}\n",
            rng.gen_range(1..1_000_000u64)
        ));
    }
    if shape.variants {
        yaml.push_str("variants:\n");
        for v in 0..rng.gen_range(1..4) {
            yaml.push_str(&format!(
                "  - id: v{v}\n    file: {id}-{v}.bin\n    url: https://cdn.example.com/{id}/{v}.bin\n    sha256: {HASH}\n    size: {}\n",
                rng.gen_range(1..1_000_000u64)
            ));
        }
    }
    yaml
}

#[test]
fn test_generated_manifests_have_exactly_one_payload() {
    let temp_dir = TempDir::new().unwrap();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let validator = validator();

    for n in 0..200 {
        let shape = Shape {
            file: rng.gen_bool(0.5),
            variants: rng.gen_bool(0.5),
            stem_matches: rng.gen_bool(0.8),
        };
        let id = format!("model-{n}");
        let stem = if shape.stem_matches {
            id.clone()
        } else {
            format!("other-{n}")
        };

        let yaml = generated(&mut rng, &id, shape);
        let dir = temp_dir.path().join(format!("case-{n}"));
        let file = write_manifest(&dir, &format!("{stem}.yaml"), &yaml);
        let validation = validator.validate_file(&file);

        let one_payload = shape.file != shape.variants;
        assert_eq!(
            validation.is_valid(),
            one_payload && shape.stem_matches,
            "case {n}: {shape:?}\n{yaml}"
        );
        assert_eq!(
            validation.errors().any(|v| v.rule == Rule::PayloadShape),
            !one_payload,
            "case {n}: {shape:?}"
        );
        assert_eq!(
            validation.errors().any(|v| v.rule == Rule::IdMismatch),
            !shape.stem_matches,
            "case {n}: {shape:?}"
        );

        if let Some(manifest) = validation.manifest {
            assert_eq!(manifest.id, file.stem());
            assert!(!manifest.descriptors().is_empty());
        }
    }
}

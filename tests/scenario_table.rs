use acw_installer::install::{Scenario, resolve};

#[test]
fn every_combination_maps_to_exactly_one_scenario() {
    // (source_present, is_git_repo, has_template) -> expected, with and without the marker file
    let table = [
        ((false, false, false), Scenario::NoSource, Scenario::NoSource),
        ((false, false, true), Scenario::NoSource, Scenario::NoSource),
        ((false, true, false), Scenario::NoSource, Scenario::NoSource),
        ((false, true, true), Scenario::NoSource, Scenario::NoSource),
        ((true, true, true), Scenario::GitRepoWithTemplate, Scenario::GitRepoWithTemplate),
        ((true, true, false), Scenario::GitRepoWithoutTemplate, Scenario::GitRepoWithoutTemplate),
        ((true, false, true), Scenario::ExtractedWithTemplate, Scenario::ExtractedWithTemplate),
        (
            (true, false, false),
            Scenario::ExtractedWithoutTemplate,
            Scenario::OutsideWithoutTemplate,
        ),
    ];

    for ((source, git, template), with_marker, without_marker) in table {
        assert_eq!(resolve(source, git, template, true), with_marker, "{source} {git} {template} +marker");
        assert_eq!(resolve(source, git, template, false), without_marker, "{source} {git} {template}");
    }
}

#[test]
fn git_and_template_flags_follow_the_scenario() {
    assert!(Scenario::GitRepoWithTemplate.is_git() && Scenario::GitRepoWithTemplate.has_template());
    assert!(Scenario::GitRepoWithoutTemplate.is_git() && !Scenario::GitRepoWithoutTemplate.has_template());
    assert!(!Scenario::ExtractedWithTemplate.is_git() && Scenario::ExtractedWithTemplate.has_template());
    assert!(!Scenario::OutsideWithoutTemplate.is_git() && !Scenario::OutsideWithoutTemplate.has_template());
    assert!(!Scenario::NoSource.is_git() && !Scenario::NoSource.has_template());
}

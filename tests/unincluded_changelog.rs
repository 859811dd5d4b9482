#[test]
fn changelog_mentions_this_version() {
	version_sync::assert_contains_regex!("CHANGELOG.md", "^## {version}$");
}

//! Seed content for objects created through the filesystem.

pub const DEFAULT_EVIDENCE: &str = "#[Description]#";

pub const DEFAULT_ISSUE: &str = "\
#[Title]#
#
##[CVSSv3.BaseScore]#
#
##[CVSSv3Vector]#
#
##[Type]#
#Internal | External
#
##[Description]#
#
##[Solution]#
#
##[References]#";

pub const DEFAULT_CONTENT_BLOCK: &str = "#[Title]#\nTitle\n";

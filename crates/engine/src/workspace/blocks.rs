// Targeted block-level mutation of the main document.
//
// The change processor updates individual sections rather than rewriting the
// page: delete blocks matching a pattern, update a matched section block in
// place, or append when no match exists.

use regex::RegexBuilder;
use tracing::warn;

use super::{Block, PagePosition, WorkspaceClient, WorkspaceError};

/// One targeted mutation of the main document.
#[derive(Debug, Clone, Default)]
pub struct BlockUpdate {
    /// Update the first block containing this text (case-insensitive).
    pub section_to_update: Option<String>,
    /// Content for the updated or appended block.
    pub new_content: Option<String>,
    /// Delete every block whose text matches this pattern
    /// (regex, case-insensitive).
    pub delete_pattern: Option<String>,
    /// Append `new_content` at the end when no section matched.
    pub append_if_not_found: bool,
}

impl BlockUpdate {
    pub fn append(content: impl Into<String>) -> Self {
        Self { new_content: Some(content.into()), append_if_not_found: true, ..Self::default() }
    }

    pub fn upsert_section(section: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            section_to_update: Some(section.into()),
            new_content: Some(content.into()),
            append_if_not_found: true,
            ..Self::default()
        }
    }
}

/// Markdown heading level of a block, if it is a heading.
fn heading_level(text: &str) -> Option<usize> {
    let trimmed = text.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    trimmed.chars().nth(hashes).filter(|c| *c == ' ').map(|_| hashes)
}

impl WorkspaceClient {
    /// Apply one targeted mutation to the page.
    ///
    /// Order: pattern deletions first, then the section update, then the
    /// append fallback. Individual block deletions are best-effort.
    pub async fn update_main_document(
        &self,
        page_id: &str,
        update: &BlockUpdate,
    ) -> Result<(), WorkspaceError> {
        let blocks = self.blocks_get(page_id).await?;

        if let Some(pattern) = &update.delete_pattern {
            let matcher = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|error| WorkspaceError::Protocol {
                    message: format!("invalid delete pattern `{pattern}`: {error}"),
                })?;
            for block in blocks.iter().filter(|block| matcher.is_match(&block.text)) {
                if let Err(error) = self.blocks_delete(&block.id).await {
                    warn!(block_id = %block.id, %error, "block deletion failed, continuing");
                }
            }
        }

        let Some(new_content) = &update.new_content else {
            return Ok(());
        };

        if let Some(section) = &update.section_to_update {
            let needle = section.to_lowercase();
            if let Some(block) =
                blocks.iter().find(|block| block.text.to_lowercase().contains(&needle))
            {
                return self.blocks_update(&block.id, new_content).await;
            }
        }

        if update.append_if_not_found {
            return self.markdown_add(page_id, new_content, PagePosition::End).await;
        }

        Ok(())
    }

    /// Replace a whole heading-scoped section: delete the heading whose text
    /// matches `section_name` and every following block until a heading of
    /// the same or higher level, then append the new markdown.
    pub async fn regenerate_section(
        &self,
        page_id: &str,
        section_name: &str,
        new_markdown: &str,
    ) -> Result<(), WorkspaceError> {
        let blocks = self.blocks_get(page_id).await?;
        let doomed = section_block_range(&blocks, section_name);

        for block in doomed {
            if let Err(error) = self.blocks_delete(&block.id).await {
                warn!(block_id = %block.id, %error, "section block deletion failed, continuing");
            }
        }

        self.markdown_add(page_id, new_markdown, PagePosition::End).await
    }
}

/// The heading block matching `section_name` plus its contiguous descendant
/// blocks, ending before the next heading of same-or-higher level.
fn section_block_range<'a>(blocks: &'a [Block], section_name: &str) -> Vec<&'a Block> {
    let needle = section_name.to_lowercase();
    let Some(start) = blocks.iter().position(|block| {
        heading_level(&block.text).is_some() && block.text.to_lowercase().contains(&needle)
    }) else {
        return Vec::new();
    };

    let level = heading_level(&blocks[start].text).unwrap_or(6);
    let mut range = vec![&blocks[start]];
    for block in &blocks[start + 1..] {
        if let Some(other) = heading_level(&block.text) {
            if other <= level {
                break;
            }
        }
        range.push(block);
    }
    range
}

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 200;
pub const DEFAULT_CHUNK_SIZE: usize = 5;
pub const MAX_CHUNK_SIZE: usize = 200;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
	pub page_size: Option<usize>,
	pub page_index: Option<usize>,
}
impl PageRequest {
	pub fn page_size(&self) -> usize {
		self.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
	}

	pub fn page_index(&self) -> usize {
		self.page_index.unwrap_or(0)
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationMetadata {
	pub page_size: usize,
	pub page_index: usize,
	pub total_items: usize,
	pub total_pages: usize,
	pub has_next_page: bool,
	pub has_previous_page: bool,
	pub next_page_index: Option<usize>,
	pub previous_page_index: Option<usize>,
	pub showing: String,
}
impl PaginationMetadata {
	pub fn new(total_items: usize, request: PageRequest) -> Self {
		let page_size = request.page_size();
		let page_index = request.page_index();
		let total_pages = total_items.div_ceil(page_size);
		let has_next_page = page_index.saturating_add(1) < total_pages;
		let has_previous_page = page_index > 0;
		let next_page_index = has_next_page.then(|| page_index + 1);
		let previous_page_index = has_previous_page.then(|| page_index - 1);
		let (start, end) = page_bounds(total_items, page_size, page_index);
		let showing = if start < end {
			let next = next_page_index
				.map(|next| format!(" Next: pageIdx={next}."))
				.unwrap_or_default();

			format!(
				"Showing {}-{end} of {total_items}.{next} Total pages: {total_pages}.",
				start + 1
			)
		} else {
			format!("Showing 0 of {total_items}. Total pages: {total_pages}.")
		};

		Self {
			page_size,
			page_index,
			total_items,
			total_pages,
			has_next_page,
			has_previous_page,
			next_page_index,
			previous_page_index,
			showing,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
	pub items: Vec<T>,
	pub metadata: PaginationMetadata,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk<T> {
	pub index: usize,
	pub items: Vec<T>,
	pub is_last: bool,
}

/// Total over every input; pages past the end come back empty.
pub fn paginate_items<T>(items: &[T], request: PageRequest) -> Page<T>
where
	T: Clone,
{
	let metadata = PaginationMetadata::new(items.len(), request);
	let (start, end) = page_bounds(items.len(), metadata.page_size, metadata.page_index);

	Page { items: items[start..end].to_vec(), metadata }
}

/// Regroups an already-paginated slice. Never changes which items are included.
pub fn chunk_items<T>(items: &[T], chunk_size: Option<usize>) -> Vec<StreamChunk<T>>
where
	T: Clone,
{
	let chunk_size = clamp_chunk_size(chunk_size);
	let count = items.len().div_ceil(chunk_size);

	items
		.chunks(chunk_size)
		.enumerate()
		.map(|(index, chunk)| StreamChunk {
			index,
			items: chunk.to_vec(),
			is_last: index + 1 == count,
		})
		.collect()
}

pub fn clamp_chunk_size(chunk_size: Option<usize>) -> usize {
	chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE).clamp(1, MAX_CHUNK_SIZE)
}

fn page_bounds(total: usize, page_size: usize, page_index: usize) -> (usize, usize) {
	let start = page_index.saturating_mul(page_size).min(total);
	let end = start.saturating_add(page_size).min(total);

	(start, end)
}

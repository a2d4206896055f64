use crate::error::Result;
use crate::models::template::PromptTemplate;
use async_trait::async_trait;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, RwLock};

/// Where prompt templates live. Lookups by id; `None` means no such template.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<Option<PromptTemplate>>;
}

#[derive(Default)]
pub struct InMemoryTemplateStore {
    templates: RwLock<HashMap<String, PromptTemplate>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_templates(templates: impl IntoIterator<Item = PromptTemplate>) -> Self {
        let store = Self::new();
        for template in templates {
            store.insert(template);
        }
        store
    }

    pub fn insert(&self, template: PromptTemplate) {
        if let Ok(mut guard) = self.templates.write() {
            guard.insert(template.id.clone(), template);
        }
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn fetch(&self, id: &str) -> Result<Option<PromptTemplate>> {
        Ok(self
            .templates
            .read()
            .ok()
            .and_then(|guard| guard.get(id).cloned()))
    }
}

#[derive(Clone)]
struct CachedTemplate {
    hash: String,
    template: PromptTemplate,
}

/// Bounded LRU cache in front of a [`TemplateStore`].
pub struct TemplateCache {
    inner: Mutex<LruCache<String, CachedTemplate>>,
}

impl TemplateCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached template, loading it from `store` on a miss.
    pub async fn get_or_load(
        &self,
        id: &str,
        store: &dyn TemplateStore,
    ) -> Result<Option<PromptTemplate>> {
        let hit = self.lock().get(id).cloned();
        if let Some(hit) = hit {
            tracing::debug!("Template cache hit: {}", id);
            return Ok(Some(hit.template));
        }

        let Some(template) = store.fetch(id).await? else {
            return Ok(None);
        };
        self.put(template.clone());
        Ok(Some(template))
    }

    /// Re-reads a template from `store`, replacing the cached copy if its content
    /// changed. Returns `true` when the entry was replaced or newly inserted.
    pub async fn refresh(&self, id: &str, store: &dyn TemplateStore) -> Result<bool> {
        match store.fetch(id).await? {
            Some(template) => Ok(self.put(template)),
            None => {
                self.invalidate(id);
                Ok(false)
            }
        }
    }

    /// Inserts `template` unless an entry with the same content hash is already cached.
    pub fn put(&self, template: PromptTemplate) -> bool {
        let hash = template.content_hash();
        let mut cache = self.lock();
        if cache.peek(&template.id).is_some_and(|c| c.hash == hash) {
            return false;
        }
        if cache.contains(&template.id) {
            tracing::info!("Template {} changed, replacing cached copy", template.id);
        }
        cache.put(template.id.clone(), CachedTemplate { hash, template });
        true
    }

    pub fn invalidate(&self, id: &str) {
        self.lock().pop(id);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CachedTemplate>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

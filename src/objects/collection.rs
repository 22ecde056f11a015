use std::ops::Index;

/// Anything addressable by name inside a [`ResourceCollection`]
pub trait Named {
    fn name(&self) -> &str;
}

/// Ordered list result, addressable by index or by name
///
/// ```ignore
/// let deployments = kube.get_deployments().await?;
/// let echo = deployments.get("echo-deployment").expect("deployed by manifest");
/// assert_eq!(deployments.len(), 1);
/// let first = &deployments[0];
/// ```
#[derive(Debug, Clone)]
pub struct ResourceCollection<T> {
    items: Vec<T>,
}

impl<T> Default for ResourceCollection<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Named> ResourceCollection<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    /// Item with the given name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&T> {
        self.items.iter().find(|item| item.name() == name)
    }

    /// Mutable item with the given name
    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.items.iter_mut().find(|item| item.name() == name)
    }

    /// Whether an item with the given name is present
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names in order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(Named::name).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    /// Remove and return the item with the given name
    pub fn take(&mut self, name: &str) -> Option<T> {
        let index = self.items.iter().position(|item| item.name() == name)?;
        Some(self.items.remove(index))
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T> Index<usize> for ResourceCollection<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.items[index]
    }
}

impl<T> IntoIterator for ResourceCollection<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a ResourceCollection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut ResourceCollection<T> {
    type Item = &'a mut T;
    type IntoIter = std::slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter_mut()
    }
}

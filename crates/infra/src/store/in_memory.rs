use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use orderledger_catalog::{Category, Product, ProductImage, ensure_acyclic};
use orderledger_core::{
    AddressId, CategoryId, CouponId, OrderId, PaymentMethodId, ProductId, ProductImageId, UserId,
};
use orderledger_customers::{Address, PaymentMethod, Profile, User};
use orderledger_sales::{CartLine, Coupon, CouponUsage, Order, Review, normalize_code};

use super::{LedgerStore, StoreError, StoreResult, StoreTx};

/// Everything a transaction can observe or change.
///
/// Entity rows and unique-index entries are versioned individually. The
/// `*Rows`/`*Orders`/`Category*` keys version the *membership* of a dependent
/// collection: they change whenever a member is added or removed, so a scan
/// that depends on "no such rows exist" conflicts with a concurrent insert.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    User(UserId),
    Email(String),
    Profile(UserId),
    Address(AddressId),
    PaymentMethod(PaymentMethodId),
    Category(CategoryId),
    Product(ProductId),
    Sku(String),
    Image(ProductImageId),
    CartLine(UserId, ProductId),
    Order(OrderId),
    OrderNumber(String),
    Coupon(CouponId),
    CouponCode(String),
    CouponUsage(OrderId),
    Review(UserId, ProductId),

    UserOrders(UserId),
    UserRows(UserId),
    CategoryChildren(CategoryId),
    CategoryProducts(CategoryId),
    ProductOrders(ProductId),
    ProductRows(ProductId),
}

#[derive(Debug, Clone, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    emails: HashMap<String, UserId>,
    profiles: HashMap<UserId, Profile>,
    addresses: HashMap<AddressId, Address>,
    payment_methods: HashMap<PaymentMethodId, PaymentMethod>,
    categories: HashMap<CategoryId, Category>,
    products: HashMap<ProductId, Product>,
    skus: HashMap<String, ProductId>,
    images: HashMap<ProductImageId, ProductImage>,
    cart: HashMap<(UserId, ProductId), CartLine>,
    orders: HashMap<OrderId, Order>,
    order_numbers: HashMap<String, OrderId>,
    coupons: HashMap<CouponId, Coupon>,
    coupon_codes: HashMap<String, CouponId>,
    coupon_usages: HashMap<OrderId, CouponUsage>,
    reviews: HashMap<(UserId, ProductId), Review>,

    /// Commit stamp of the last change to each key. Keys are never removed,
    /// so "absent" and "deleted since" stay distinguishable.
    versions: HashMap<RowKey, u64>,
    clock: u64,
}

fn sync<K, V>(dst: &mut HashMap<K, V>, src: &HashMap<K, V>, key: &K)
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    match src.get(key) {
        Some(value) => {
            dst.insert(key.clone(), value.clone());
        }
        None => {
            dst.remove(key);
        }
    }
}

impl Tables {
    /// Copy the state of `key` from a transaction's working copy.
    fn copy_row(&mut self, from: &Tables, key: &RowKey) {
        match key {
            RowKey::User(id) => sync(&mut self.users, &from.users, id),
            RowKey::Email(email) => sync(&mut self.emails, &from.emails, email),
            RowKey::Profile(id) => sync(&mut self.profiles, &from.profiles, id),
            RowKey::Address(id) => sync(&mut self.addresses, &from.addresses, id),
            RowKey::PaymentMethod(id) => sync(&mut self.payment_methods, &from.payment_methods, id),
            RowKey::Category(id) => sync(&mut self.categories, &from.categories, id),
            RowKey::Product(id) => sync(&mut self.products, &from.products, id),
            RowKey::Sku(sku) => sync(&mut self.skus, &from.skus, sku),
            RowKey::Image(id) => sync(&mut self.images, &from.images, id),
            RowKey::CartLine(user_id, product_id) => {
                sync(&mut self.cart, &from.cart, &(*user_id, *product_id))
            }
            RowKey::Order(id) => sync(&mut self.orders, &from.orders, id),
            RowKey::OrderNumber(number) => sync(&mut self.order_numbers, &from.order_numbers, number),
            RowKey::Coupon(id) => sync(&mut self.coupons, &from.coupons, id),
            RowKey::CouponCode(code) => sync(&mut self.coupon_codes, &from.coupon_codes, code),
            RowKey::CouponUsage(id) => sync(&mut self.coupon_usages, &from.coupon_usages, id),
            RowKey::Review(user_id, product_id) => {
                sync(&mut self.reviews, &from.reviews, &(*user_id, *product_id))
            }
            RowKey::UserOrders(_)
            | RowKey::UserRows(_)
            | RowKey::CategoryChildren(_)
            | RowKey::CategoryProducts(_)
            | RowKey::ProductOrders(_)
            | RowKey::ProductRows(_) => {}
        }
    }
}

/// In-memory ledger store with optimistic transactions.
///
/// Each transaction works on a private copy of the tables taken at `begin()`
/// and records the version of every key it reads. `commit()` takes the write
/// lock, checks that none of those keys moved, then copies the written keys
/// back. Intended for tests, the demo binary and single-process use.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load fixtures or historical data.
    ///
    /// Runs `f` in a transaction and commits it. Inside, the inherent
    /// [`InMemoryTx::import_order`] bypasses the order's reference checks.
    pub fn seed<F>(&self, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut InMemoryTx) -> StoreResult<()>,
    {
        let mut tx = self.begin()?;
        f(&mut tx)?;
        tx.commit()
    }

    /// Run read-only queries against a consistent snapshot.
    pub fn view<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut InMemoryTx) -> StoreResult<T>,
    {
        let mut tx = self.begin()?;
        f(&mut tx)
    }
}

impl LedgerStore for InMemoryLedgerStore {
    type Tx = InMemoryTx;

    fn begin(&self) -> StoreResult<InMemoryTx> {
        let work = self
            .tables
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?
            .clone();

        Ok(InMemoryTx {
            shared: Arc::clone(&self.tables),
            work,
            observed: HashMap::new(),
            written: HashSet::new(),
        })
    }
}

/// Transaction over [`InMemoryLedgerStore`]. Dropping it rolls back.
#[derive(Debug)]
pub struct InMemoryTx {
    shared: Arc<RwLock<Tables>>,
    work: Tables,
    observed: HashMap<RowKey, Option<u64>>,
    written: HashSet<RowKey>,
}

impl InMemoryTx {
    /// Remember the snapshot version of `key` (first read wins).
    fn observe(&mut self, key: RowKey) {
        let version = self.work.versions.get(&key).copied();
        self.observed.entry(key).or_insert(version);
    }

    /// Read-modify-write of `key`.
    fn touch(&mut self, key: RowKey) {
        self.observe(key.clone());
        self.written.insert(key);
    }

    /// Blind write of `key` (used for collection membership).
    fn bump(&mut self, key: RowKey) {
        self.written.insert(key);
    }

    fn require_user(&mut self, id: UserId) -> StoreResult<()> {
        self.observe(RowKey::User(id));
        if self.work.users.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::constraint(format!("user {id} does not exist")))
        }
    }

    fn require_product(&mut self, id: ProductId) -> StoreResult<()> {
        self.observe(RowKey::Product(id));
        if self.work.products.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::constraint(format!("product {id} does not exist")))
        }
    }

    /// Insert a historical order without checking that its user, addresses,
    /// coupon or products still exist.
    pub fn import_order(&mut self, order: &Order) -> StoreResult<()> {
        self.put_new_order(order)
    }

    fn put_new_order(&mut self, order: &Order) -> StoreResult<()> {
        let id = order.id();
        self.touch(RowKey::Order(id));
        if self.work.orders.contains_key(&id) {
            return Err(StoreError::constraint(format!("order {id} already exists")));
        }

        let number = order.order_number().to_string();
        self.touch(RowKey::OrderNumber(number.clone()));
        if self.work.order_numbers.contains_key(&number) {
            return Err(StoreError::Conflict(format!(
                "order number '{number}' is already taken"
            )));
        }

        self.bump(RowKey::UserOrders(order.user_id()));
        for item in order.items() {
            self.bump(RowKey::ProductOrders(item.product_id()));
        }
        self.work.order_numbers.insert(number, id);
        self.work.orders.insert(id, order.clone());
        Ok(())
    }

    fn remove_cart_row(&mut self, user_id: UserId, product_id: ProductId) -> bool {
        self.touch(RowKey::CartLine(user_id, product_id));
        let removed = self.work.cart.remove(&(user_id, product_id)).is_some();
        if removed {
            self.bump(RowKey::UserRows(user_id));
            self.bump(RowKey::ProductRows(product_id));
        }
        removed
    }

    fn remove_review_row(&mut self, user_id: UserId, product_id: ProductId) {
        self.touch(RowKey::Review(user_id, product_id));
        if self.work.reviews.remove(&(user_id, product_id)).is_some() {
            self.bump(RowKey::UserRows(user_id));
            self.bump(RowKey::ProductRows(product_id));
        }
    }
}

impl StoreTx for InMemoryTx {
    fn user(&mut self, id: UserId) -> StoreResult<Option<User>> {
        self.observe(RowKey::User(id));
        Ok(self.work.users.get(&id).cloned())
    }

    fn save_user(&mut self, user: &User) -> StoreResult<()> {
        let id = user.id();
        let email = user.email().to_string();
        self.touch(RowKey::User(id));

        let previous = self.work.users.get(&id).map(|u| u.email().to_string());
        if previous.as_deref() != Some(email.as_str()) {
            self.touch(RowKey::Email(email.clone()));
            if self.work.emails.contains_key(&email) {
                return Err(StoreError::constraint(format!(
                    "email '{email}' is already registered"
                )));
            }
            if let Some(old) = previous {
                self.touch(RowKey::Email(old.clone()));
                self.work.emails.remove(&old);
            }
            self.work.emails.insert(email, id);
        }

        self.work.users.insert(id, user.clone());
        Ok(())
    }

    fn delete_user(&mut self, id: UserId) -> StoreResult<()> {
        self.touch(RowKey::User(id));
        let Some(user) = self.work.users.get(&id).cloned() else {
            return Err(StoreError::missing("user", id));
        };

        self.observe(RowKey::UserOrders(id));
        if self.work.orders.values().any(|o| o.user_id() == id) {
            return Err(StoreError::constraint(format!(
                "user {id} cannot be deleted while orders reference it"
            )));
        }

        self.touch(RowKey::UserRows(id));

        self.touch(RowKey::Profile(id));
        self.work.profiles.remove(&id);

        let addresses: Vec<AddressId> = self
            .work
            .addresses
            .values()
            .filter(|a| a.user_id == id)
            .map(|a| a.id)
            .collect();
        for address_id in addresses {
            self.touch(RowKey::Address(address_id));
            self.work.addresses.remove(&address_id);
        }

        let methods: Vec<PaymentMethodId> = self
            .work
            .payment_methods
            .values()
            .filter(|m| m.user_id == id)
            .map(|m| m.id)
            .collect();
        for method_id in methods {
            self.touch(RowKey::PaymentMethod(method_id));
            self.work.payment_methods.remove(&method_id);
        }

        let cart: Vec<ProductId> = self
            .work
            .cart
            .keys()
            .filter(|(user_id, _)| *user_id == id)
            .map(|(_, product_id)| *product_id)
            .collect();
        for product_id in cart {
            self.remove_cart_row(id, product_id);
        }

        let reviewed: Vec<ProductId> = self
            .work
            .reviews
            .keys()
            .filter(|(user_id, _)| *user_id == id)
            .map(|(_, product_id)| *product_id)
            .collect();
        for product_id in reviewed {
            self.remove_review_row(id, product_id);
        }

        let email = user.email().to_string();
        self.touch(RowKey::Email(email.clone()));
        self.work.emails.remove(&email);
        self.work.users.remove(&id);
        Ok(())
    }

    fn profile(&mut self, user_id: UserId) -> StoreResult<Option<Profile>> {
        self.observe(RowKey::Profile(user_id));
        Ok(self.work.profiles.get(&user_id).cloned())
    }

    fn insert_profile(&mut self, profile: &Profile) -> StoreResult<()> {
        let user_id = profile.user_id;
        self.require_user(user_id)?;
        self.touch(RowKey::Profile(user_id));
        if self.work.profiles.contains_key(&user_id) {
            return Err(StoreError::constraint(format!(
                "user {user_id} already has a profile"
            )));
        }
        self.bump(RowKey::UserRows(user_id));
        self.work.profiles.insert(user_id, profile.clone());
        Ok(())
    }

    fn address(&mut self, id: AddressId) -> StoreResult<Option<Address>> {
        self.observe(RowKey::Address(id));
        Ok(self.work.addresses.get(&id).cloned())
    }

    fn save_address(&mut self, address: &Address) -> StoreResult<()> {
        self.require_user(address.user_id)?;
        self.touch(RowKey::Address(address.id));
        match self.work.addresses.get(&address.id) {
            Some(existing) if existing.user_id != address.user_id => {
                return Err(StoreError::constraint(format!(
                    "address {} belongs to another user",
                    address.id
                )));
            }
            Some(_) => {}
            None => self.bump(RowKey::UserRows(address.user_id)),
        }
        self.work.addresses.insert(address.id, address.clone());
        Ok(())
    }

    fn addresses(&mut self, user_id: UserId) -> StoreResult<Vec<Address>> {
        self.observe(RowKey::UserRows(user_id));
        let mut found: Vec<Address> = self
            .work
            .addresses
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by_key(|a| a.id);
        for address in &found {
            self.observe(RowKey::Address(address.id));
        }
        Ok(found)
    }

    fn save_payment_method(&mut self, method: &PaymentMethod) -> StoreResult<()> {
        self.require_user(method.user_id)?;
        self.touch(RowKey::PaymentMethod(method.id));
        match self.work.payment_methods.get(&method.id) {
            Some(existing) if existing.user_id != method.user_id => {
                return Err(StoreError::constraint(format!(
                    "payment method {} belongs to another user",
                    method.id
                )));
            }
            Some(_) => {}
            None => self.bump(RowKey::UserRows(method.user_id)),
        }
        self.work.payment_methods.insert(method.id, method.clone());
        Ok(())
    }

    fn payment_methods(&mut self, user_id: UserId) -> StoreResult<Vec<PaymentMethod>> {
        self.observe(RowKey::UserRows(user_id));
        let mut found: Vec<PaymentMethod> = self
            .work
            .payment_methods
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by_key(|m| m.id);
        for method in &found {
            self.observe(RowKey::PaymentMethod(method.id));
        }
        Ok(found)
    }

    fn category(&mut self, id: CategoryId) -> StoreResult<Option<Category>> {
        self.observe(RowKey::Category(id));
        Ok(self.work.categories.get(&id).cloned())
    }

    fn save_category(&mut self, category: &Category) -> StoreResult<()> {
        let id = category.id;
        self.touch(RowKey::Category(id));

        let walked = RefCell::new(Vec::new());
        {
            let categories = &self.work.categories;
            ensure_acyclic(id, category.parent_id, |current| {
                walked.borrow_mut().push(current);
                categories.get(&current).map(|c| c.parent_id)
            })
            .map_err(|e| StoreError::constraint(e.to_string()))?;
        }
        for ancestor in walked.into_inner() {
            self.observe(RowKey::Category(ancestor));
        }

        let previous_parent = self.work.categories.get(&id).map(|c| c.parent_id);
        if previous_parent != Some(category.parent_id) {
            if let Some(Some(old)) = previous_parent {
                self.bump(RowKey::CategoryChildren(old));
            }
            if let Some(new) = category.parent_id {
                self.bump(RowKey::CategoryChildren(new));
            }
        }

        self.work.categories.insert(id, category.clone());
        Ok(())
    }

    fn delete_category(&mut self, id: CategoryId) -> StoreResult<()> {
        self.touch(RowKey::Category(id));
        let Some(parent_id) = self.work.categories.get(&id).map(|c| c.parent_id) else {
            return Err(StoreError::missing("category", id));
        };

        self.observe(RowKey::CategoryProducts(id));
        if self.work.products.values().any(|p| p.category_id() == id) {
            return Err(StoreError::constraint(format!(
                "category {id} cannot be deleted while products reference it"
            )));
        }

        self.touch(RowKey::CategoryChildren(id));
        let children: Vec<CategoryId> = self
            .work
            .categories
            .values()
            .filter(|c| c.parent_id == Some(id))
            .map(|c| c.id)
            .collect();
        for child_id in children {
            self.touch(RowKey::Category(child_id));
            if let Some(child) = self.work.categories.get_mut(&child_id) {
                child.parent_id = None;
            }
        }

        if let Some(parent) = parent_id {
            self.bump(RowKey::CategoryChildren(parent));
        }
        self.work.categories.remove(&id);
        Ok(())
    }

    fn product(&mut self, id: ProductId) -> StoreResult<Option<Product>> {
        self.observe(RowKey::Product(id));
        Ok(self.work.products.get(&id).cloned())
    }

    fn save_product(&mut self, product: &Product) -> StoreResult<()> {
        let id = product.id();
        self.touch(RowKey::Product(id));

        let previous = self
            .work
            .products
            .get(&id)
            .map(|p| (p.sku().to_string(), p.category_id()));

        let category_changed = previous.as_ref().map(|(_, c)| *c) != Some(product.category_id());
        if category_changed {
            self.observe(RowKey::Category(product.category_id()));
            if !self.work.categories.contains_key(&product.category_id()) {
                return Err(StoreError::constraint(format!(
                    "category {} does not exist",
                    product.category_id()
                )));
            }
            if let Some((_, old)) = &previous {
                self.bump(RowKey::CategoryProducts(*old));
            }
            self.bump(RowKey::CategoryProducts(product.category_id()));
        }

        let sku = product.sku().to_string();
        if previous.as_ref().map(|(s, _)| s.as_str()) != Some(sku.as_str()) {
            self.touch(RowKey::Sku(sku.clone()));
            if self.work.skus.contains_key(&sku) {
                return Err(StoreError::constraint(format!("sku '{sku}' is already in use")));
            }
            if let Some((old, _)) = previous {
                self.touch(RowKey::Sku(old.clone()));
                self.work.skus.remove(&old);
            }
            self.work.skus.insert(sku, id);
        }

        self.work.products.insert(id, product.clone());
        Ok(())
    }

    fn delete_product(&mut self, id: ProductId) -> StoreResult<()> {
        self.touch(RowKey::Product(id));
        let Some(product) = self.work.products.get(&id).cloned() else {
            return Err(StoreError::missing("product", id));
        };

        self.observe(RowKey::ProductOrders(id));
        if self
            .work
            .orders
            .values()
            .any(|o| o.item_for(id).is_some())
        {
            return Err(StoreError::constraint(format!(
                "product {id} cannot be deleted while order items reference it"
            )));
        }

        self.touch(RowKey::ProductRows(id));

        let images: Vec<ProductImageId> = self
            .work
            .images
            .values()
            .filter(|i| i.product_id == id)
            .map(|i| i.id)
            .collect();
        for image_id in images {
            self.touch(RowKey::Image(image_id));
            self.work.images.remove(&image_id);
        }

        let carts: Vec<UserId> = self
            .work
            .cart
            .keys()
            .filter(|(_, product_id)| *product_id == id)
            .map(|(user_id, _)| *user_id)
            .collect();
        for user_id in carts {
            self.remove_cart_row(user_id, id);
        }

        let reviewers: Vec<UserId> = self
            .work
            .reviews
            .keys()
            .filter(|(_, product_id)| *product_id == id)
            .map(|(user_id, _)| *user_id)
            .collect();
        for user_id in reviewers {
            self.remove_review_row(user_id, id);
        }

        let sku = product.sku().to_string();
        self.touch(RowKey::Sku(sku.clone()));
        self.work.skus.remove(&sku);
        self.bump(RowKey::CategoryProducts(product.category_id()));
        self.work.products.remove(&id);
        Ok(())
    }

    fn save_image(&mut self, image: &ProductImage) -> StoreResult<()> {
        self.require_product(image.product_id)?;
        self.touch(RowKey::Image(image.id));
        if !self.work.images.contains_key(&image.id) {
            self.bump(RowKey::ProductRows(image.product_id));
        }

        if image.is_primary {
            let demoted: Vec<ProductImageId> = self
                .work
                .images
                .values()
                .filter(|i| i.product_id == image.product_id && i.is_primary && i.id != image.id)
                .map(|i| i.id)
                .collect();
            for other in demoted {
                self.touch(RowKey::Image(other));
                if let Some(i) = self.work.images.get_mut(&other) {
                    i.is_primary = false;
                }
            }
        }

        self.work.images.insert(image.id, image.clone());
        Ok(())
    }

    fn images(&mut self, product_id: ProductId) -> StoreResult<Vec<ProductImage>> {
        self.observe(RowKey::ProductRows(product_id));
        let mut found: Vec<ProductImage> = self
            .work
            .images
            .values()
            .filter(|i| i.product_id == product_id)
            .cloned()
            .collect();
        found.sort_by_key(|i| (i.sort_order, i.id));
        for image in &found {
            self.observe(RowKey::Image(image.id));
        }
        Ok(found)
    }

    fn cart_lines(&mut self, user_id: UserId) -> StoreResult<Vec<CartLine>> {
        self.observe(RowKey::UserRows(user_id));
        let mut lines: Vec<CartLine> = self
            .work
            .cart
            .values()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect();
        lines.sort_by_key(|l| (l.added_at, l.product_id));
        for line in &lines {
            self.observe(RowKey::CartLine(user_id, line.product_id));
        }
        Ok(lines)
    }

    fn cart_line(
        &mut self,
        user_id: UserId,
        product_id: ProductId,
    ) -> StoreResult<Option<CartLine>> {
        self.observe(RowKey::CartLine(user_id, product_id));
        Ok(self.work.cart.get(&(user_id, product_id)).cloned())
    }

    fn save_cart_line(&mut self, line: &CartLine) -> StoreResult<()> {
        self.require_user(line.user_id)?;
        self.require_product(line.product_id)?;
        let key = (line.user_id, line.product_id);
        self.touch(RowKey::CartLine(key.0, key.1));
        if !self.work.cart.contains_key(&key) {
            self.bump(RowKey::UserRows(key.0));
            self.bump(RowKey::ProductRows(key.1));
        }
        self.work.cart.insert(key, line.clone());
        Ok(())
    }

    fn remove_cart_line(&mut self, user_id: UserId, product_id: ProductId) -> StoreResult<bool> {
        Ok(self.remove_cart_row(user_id, product_id))
    }

    fn coupon_by_code(&mut self, code: &str) -> StoreResult<Option<Coupon>> {
        let code = normalize_code(code);
        self.observe(RowKey::CouponCode(code.clone()));
        let Some(id) = self.work.coupon_codes.get(&code).copied() else {
            return Ok(None);
        };
        self.observe(RowKey::Coupon(id));
        Ok(self.work.coupons.get(&id).cloned())
    }

    fn save_coupon(&mut self, coupon: &Coupon) -> StoreResult<()> {
        let id = coupon.id();
        self.touch(RowKey::Coupon(id));

        let code = coupon.code().to_string();
        let previous = self.work.coupons.get(&id).map(|c| c.code().to_string());
        if previous.as_deref() != Some(code.as_str()) {
            self.touch(RowKey::CouponCode(code.clone()));
            if self.work.coupon_codes.contains_key(&code) {
                return Err(StoreError::constraint(format!(
                    "coupon code '{code}' is already in use"
                )));
            }
            if let Some(old) = previous {
                self.touch(RowKey::CouponCode(old.clone()));
                self.work.coupon_codes.remove(&old);
            }
            self.work.coupon_codes.insert(code, id);
        }

        self.work.coupons.insert(id, coupon.clone());
        Ok(())
    }

    fn coupon_usage(&mut self, order_id: OrderId) -> StoreResult<Option<CouponUsage>> {
        self.observe(RowKey::CouponUsage(order_id));
        Ok(self.work.coupon_usages.get(&order_id).cloned())
    }

    fn insert_coupon_usage(&mut self, usage: &CouponUsage) -> StoreResult<()> {
        self.observe(RowKey::Coupon(usage.coupon_id));
        if !self.work.coupons.contains_key(&usage.coupon_id) {
            return Err(StoreError::constraint(format!(
                "coupon {} does not exist",
                usage.coupon_id
            )));
        }
        self.observe(RowKey::Order(usage.order_id));
        if !self.work.orders.contains_key(&usage.order_id) {
            return Err(StoreError::constraint(format!(
                "order {} does not exist",
                usage.order_id
            )));
        }

        self.touch(RowKey::CouponUsage(usage.order_id));
        if self.work.coupon_usages.contains_key(&usage.order_id) {
            return Err(StoreError::constraint(format!(
                "order {} already redeemed a coupon",
                usage.order_id
            )));
        }
        self.work.coupon_usages.insert(usage.order_id, usage.clone());
        Ok(())
    }

    fn order(&mut self, id: OrderId) -> StoreResult<Option<Order>> {
        self.observe(RowKey::Order(id));
        Ok(self.work.orders.get(&id).cloned())
    }

    fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        self.require_user(order.user_id())?;
        for address_id in [order.shipping_address_id(), order.billing_address_id()]
            .into_iter()
            .flatten()
        {
            self.observe(RowKey::Address(address_id));
            if !self.work.addresses.contains_key(&address_id) {
                return Err(StoreError::constraint(format!(
                    "address {address_id} does not exist"
                )));
            }
        }
        if let Some(coupon_id) = order.coupon_id() {
            self.observe(RowKey::Coupon(coupon_id));
            if !self.work.coupons.contains_key(&coupon_id) {
                return Err(StoreError::constraint(format!(
                    "coupon {coupon_id} does not exist"
                )));
            }
        }
        for item in order.items() {
            self.require_product(item.product_id())?;
        }

        self.put_new_order(order)
    }

    fn update_order(&mut self, order: &Order) -> StoreResult<()> {
        let id = order.id();
        self.touch(RowKey::Order(id));
        let Some(existing) = self.work.orders.get(&id) else {
            return Err(StoreError::missing("order", id));
        };
        if existing.order_number() != order.order_number()
            || existing.user_id() != order.user_id()
            || existing.items() != order.items()
        {
            return Err(StoreError::constraint(format!(
                "order {id}: number, owner and items are immutable"
            )));
        }
        self.work.orders.insert(id, order.clone());
        Ok(())
    }

    fn review(&mut self, user_id: UserId, product_id: ProductId) -> StoreResult<Option<Review>> {
        self.observe(RowKey::Review(user_id, product_id));
        Ok(self.work.reviews.get(&(user_id, product_id)).cloned())
    }

    fn insert_review(&mut self, review: &Review) -> StoreResult<()> {
        self.require_user(review.user_id)?;
        self.require_product(review.product_id)?;
        if let Some(order_id) = review.order_id {
            self.observe(RowKey::Order(order_id));
            if !self.work.orders.contains_key(&order_id) {
                return Err(StoreError::constraint(format!(
                    "order {order_id} does not exist"
                )));
            }
        }

        let key = (review.user_id, review.product_id);
        self.touch(RowKey::Review(key.0, key.1));
        if self.work.reviews.contains_key(&key) {
            return Err(StoreError::constraint(format!(
                "user {} already reviewed product {}",
                key.0, key.1
            )));
        }
        self.bump(RowKey::UserRows(key.0));
        self.bump(RowKey::ProductRows(key.1));
        self.work.reviews.insert(key, review.clone());
        Ok(())
    }

    fn reviews_for_product(&mut self, product_id: ProductId) -> StoreResult<Vec<Review>> {
        self.observe(RowKey::ProductRows(product_id));
        let mut found: Vec<Review> = self
            .work
            .reviews
            .values()
            .filter(|r| r.product_id == product_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| (r.created_at, r.id));
        for review in &found {
            self.observe(RowKey::Review(review.user_id, product_id));
        }
        Ok(found)
    }

    fn commit(self) -> StoreResult<()> {
        if self.written.is_empty() {
            return Ok(());
        }

        let mut live = self
            .shared
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;

        for (key, seen) in &self.observed {
            let current = live.versions.get(key).copied();
            if current != *seen {
                return Err(StoreError::Conflict(format!(
                    "{key:?} changed (read at {seen:?}, now {current:?})"
                )));
            }
        }

        live.clock += 1;
        let stamp = live.clock;
        for key in &self.written {
            live.copy_row(&self.work, key);
            live.versions.insert(key.clone(), stamp);
        }
        Ok(())
    }
}

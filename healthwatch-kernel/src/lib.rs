/**
 * HEALTHWATCH KERNEL - Bibliothèque du moniteur de santé de clusters
 *
 * RÔLE : Expose les briques du kernel (modèle, store, agrégation, alertes,
 * collecteurs, providers, scheduler, API HTTP) au binaire et aux intégrateurs.
 *
 * UTILITÉ : Règles d'alerte et callbacks ajoutés par programme, collecteurs
 * personnalisés via CollectorFactory, store réutilisable hors du serveur.
 */

pub mod alerts;
pub mod collector;
pub mod config;
pub mod health;
pub mod http;
pub mod models;
pub mod provider;
pub mod scheduler;
pub mod store;
